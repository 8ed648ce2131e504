//! Employee notification seam.
//!
//! Notification delivery is an external collaborator; the engine only
//! triggers it with a user id and a point summary on manual create/update.

/// Receives notification triggers from the Point Creation Service.
pub trait Notifier: Send + Sync {
    /// Called after a manual point is created or updated for `user_id`.
    fn point_recorded(&self, user_id: i64, summary: &str);
}

/// A notifier that drops every trigger. Default for deployments where the
/// calling layer handles notifications itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn point_recorded(&self, _user_id: i64, _summary: &str) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Notifier;
    use std::sync::Mutex;

    /// Records triggers so tests can assert on them.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(i64, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn point_recorded(&self, user_id: i64, summary: &str) {
            self.sent
                .lock()
                .expect("notifier lock")
                .push((user_id, summary.to_string()));
        }
    }
}
