//! User-facing alerts. These are reported to the human in front of the emulator, the emulated
//! console keeps running.

pub trait AlertHandler: Send {
    fn panic_alert(&mut self, msg: &str);
}

/// Default handler, just logs the message
pub struct LogAlert;

impl AlertHandler for LogAlert {
    fn panic_alert(&mut self, msg: &str) {
        error!("{}", msg);
    }
}

/// Keeps track of all the alerts raised
#[cfg(test)]
pub struct RecordAlert(pub std::sync::Arc<std::sync::Mutex<Vec<String>>>);

#[cfg(test)]
impl AlertHandler for RecordAlert {
    fn panic_alert(&mut self, msg: &str) {
        self.0.lock().unwrap().push(msg.to_string());
    }
}
