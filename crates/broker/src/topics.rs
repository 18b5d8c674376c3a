//! Topic names shared by the orchestrator and the downstream services.

/// Inbound requests for the users service.
pub const USERS_REQUESTS: &str = "users.requests";

/// Inbound requests for the accounts service.
pub const ACCOUNTS_REQUESTS: &str = "accounts.requests";

/// Inbound requests for the notification service; saga notices go here too.
pub const NOTIFICATION_REQUESTS: &str = "notification.requests";

/// Successful replies addressed to the orchestrator.
pub const ORCHESTRATOR_RESULTS: &str = "orchestrator.results";

/// Failure replies addressed to the orchestrator.
pub const ORCHESTRATOR_ERRORS: &str = "orchestrator.errors";

/// Topics the orchestrator consumes.
pub const REPLY_TOPICS: [&str; 2] = [ORCHESTRATOR_RESULTS, ORCHESTRATOR_ERRORS];
