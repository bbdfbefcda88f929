/// Collaborator that surfaces migration progress and failure to the
/// user. At most one create and one dismiss are issued per episode.
pub trait MigrationNotifier: Send + Sync {
    fn create(&self, notification_id: &str, message: &str);
    fn dismiss(&self, notification_id: &str);
}

/// Default collaborator that drops all notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl MigrationNotifier for NullNotifier {
    fn create(&self, _notification_id: &str, _message: &str) {}

    fn dismiss(&self, _notification_id: &str) {}
}

pub(crate) const MIGRATION_NOTIFICATION_ID: &str = "chronicle_migration";
pub(crate) const FAILURE_NOTIFICATION_ID: &str = "chronicle_migration_failed";
