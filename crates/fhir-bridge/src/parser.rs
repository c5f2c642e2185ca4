use tracing::debug;

/// One vital sign extracted from a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Vital {
    /// Beats per minute.
    HeartRate(f64),
    /// SpO2 in percent.
    OxygenSaturation(f64),
    /// Ambient temperature in degrees Celsius.
    Temperature(f64),
    /// Relative humidity in percent.
    Humidity(f64),
}

/// Tokenizes one `Name: value` line from the microcontroller.
///
/// Zero or negative heart rate and SpO2 values are warm-up output from the
/// sensor, not measurements, and are dropped here. Anything unrecognized
/// yields `None`.
pub fn parse(line: &str) -> Option<Vital> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (name, value) = line.split_once(':')?;
    let value = value.trim();
    match name {
        "Heartrate" => positive(value.parse().ok()?).map(Vital::HeartRate),
        "Oxygen" => positive(value.parse().ok()?).map(Vital::OxygenSaturation),
        "Temperature" => {
            let value = value.trim_end_matches("°C").trim_end();
            value.parse().ok().map(Vital::Temperature)
        }
        "Humidity" => {
            let value = value.trim_end_matches('%').trim_end();
            value.parse().ok().map(Vital::Humidity)
        }
        _ => {
            debug!("unrecognized line: {line:?}");
            None
        }
    }
}

fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_every_vital() {
        assert_eq!(parse("Heartrate: 72"), Some(Vital::HeartRate(72.0)));
        assert_eq!(parse("Oxygen: 98"), Some(Vital::OxygenSaturation(98.0)));
        assert_eq!(parse("Temperature: 21.5°C"), Some(Vital::Temperature(21.5)));
        assert_eq!(parse("Humidity: 45.2 %"), Some(Vital::Humidity(45.2)));
    }

    #[test]
    fn warmup_zeros_are_dropped() {
        assert_eq!(parse("Heartrate: 0"), None);
        assert_eq!(parse("Oxygen: -1"), None);
        // zero is a legal environment value though
        assert_eq!(parse("Temperature: 0.0"), Some(Vital::Temperature(0.0)));
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("   "), None);
        assert_eq!(parse("Heartrate"), None);
        assert_eq!(parse("Heartrate: fast"), None);
        assert_eq!(parse("Steps: 1000"), None);
    }
}
