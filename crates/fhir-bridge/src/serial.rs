use std::io::{BufRead, BufReader, ErrorKind};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

use crate::parser;
use crate::{SourceError, Update};

const REOPEN_DELAY: Duration = Duration::from_secs(5);
/// Arduino compatible boards reboot when the port is opened.
const BOOT_DELAY: Duration = Duration::from_secs(2);

/// Reads vitals lines from the serial attached microcontroller on its own
/// thread. The port is reopened after I/O errors instead of giving up.
pub fn start_reading(port: String, baud: u32, tx: Sender<Update>) {
    thread::spawn(move || loop {
        let serial = match serialport::new(port.as_str(), baud)
            .timeout(Duration::from_secs(1))
            .open()
        {
            Ok(serial) => serial,
            Err(err) => {
                tx.blocking_send(Err(SourceError::SerialOpen {
                    port: port.clone(),
                    err,
                }))
                .expect("bundle poster never stops");
                thread::sleep(REOPEN_DELAY);
                continue;
            }
        };
        info!("listening on {port} at {baud} baud");
        thread::sleep(BOOT_DELAY);

        let mut reader = BufReader::new(serial);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    warn!("serial port closed, reopening");
                    break;
                }
                Ok(_) => {
                    if let Some(vital) = parser::parse(&line) {
                        tx.blocking_send(Ok(vital))
                            .expect("bundle poster never stops");
                    }
                }
                // the 1s read timeout just means no line arrived yet, and
                // mangled bytes from the boot banner are not worth a reopen
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::InvalidData
                    ) =>
                {
                    continue
                }
                Err(err) => {
                    tx.blocking_send(Err(SourceError::SerialRead(err)))
                        .expect("bundle poster never stops");
                    thread::sleep(REOPEN_DELAY);
                    break;
                }
            }
        }
    });
}
