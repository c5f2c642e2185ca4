use crate::parser::Vital;

/// Accumulates vitals between posts.
///
/// Each vital has its own window since the posting cadences differ; taking
/// an average drains the matching window.
#[derive(Debug, Default)]
pub struct Aggregator {
    heart_rate: Vec<f64>,
    oxygen: Vec<f64>,
    temperature: Vec<f64>,
    humidity: Vec<f64>,
}

impl Aggregator {
    pub fn add(&mut self, vital: Vital) {
        match vital {
            Vital::HeartRate(value) => self.heart_rate.push(value),
            Vital::OxygenSaturation(value) => self.oxygen.push(value),
            Vital::Temperature(value) => self.temperature.push(value),
            Vital::Humidity(value) => self.humidity.push(value),
        }
    }

    /// Average heart rate since the last call, `None` for an empty window.
    pub fn take_heart_rate(&mut self) -> Option<f64> {
        average(&mut self.heart_rate)
    }

    pub fn take_oxygen(&mut self) -> Option<f64> {
        average(&mut self.oxygen)
    }

    /// Average ambient temperature and humidity since the last call.
    pub fn take_environment(&mut self) -> (Option<f64>, Option<f64>) {
        (average(&mut self.temperature), average(&mut self.humidity))
    }
}

fn average(window: &mut Vec<f64>) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    let avg = window.iter().sum::<f64>() / window.len() as f64;
    window.clear();
    Some((avg * 100.0).round() / 100.0)
}
