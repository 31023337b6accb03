//! Paths of every operation exposed by the server. All are `POST` unless
//! noted otherwise.

pub const HEALTH: &str = "/healthz"; // GET

pub const AUTH_LOGIN: &str = "/api/v1/auth/login";
pub const AUTH_REFRESH: &str = "/api/v1/auth/refresh";
pub const AUTH_LOGOUT: &str = "/api/v1/auth/logout";
pub const AUTH_FORCE_LOGOUT: &str = "/api/v1/auth/force-logout";

pub const PINS_GENERATE: &str = "/api/v1/pins/generate";
pub const PINS_CLAIM: &str = "/api/v1/pins/claim";

pub const TASKS_LIBRARY_CREATE: &str = "/api/v1/tasks/library/create";
pub const TASKS_ASSIGN: &str = "/api/v1/tasks/assign";
pub const TASKS_COMPLETE: &str = "/api/v1/tasks/complete";
pub const TASKS_VERIFY: &str = "/api/v1/tasks/verify";
pub const TASKS_DELETE: &str = "/api/v1/tasks/delete";
pub const TASKS_LIST: &str = "/api/v1/tasks/list";

pub const TICKETS_ADJUST: &str = "/api/v1/tickets/adjust";
pub const TICKETS_BALANCE: &str = "/api/v1/tickets/balance";
pub const TICKETS_HISTORY: &str = "/api/v1/tickets/history";

pub const REWARDS_CREATE: &str = "/api/v1/rewards/create";
pub const REWARDS_LIST: &str = "/api/v1/rewards/list";
pub const REWARDS_REDEEM: &str = "/api/v1/rewards/redeem";

pub const USERS_CREATE: &str = "/api/v1/users/create";
pub const USERS_UPDATE: &str = "/api/v1/users/update";
pub const USERS_DELETE: &str = "/api/v1/users/delete";
pub const USERS_TOGGLE_STATUS: &str = "/api/v1/users/toggle-status";

pub const PRACTICE_LOG: &str = "/api/v1/practice/log";
pub const PRACTICE_STREAK: &str = "/api/v1/practice/streak";

pub fn url(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(
            url("http://127.0.0.1:5151/", TASKS_VERIFY),
            "http://127.0.0.1:5151/api/v1/tasks/verify"
        );
    }

    #[test]
    fn api_paths_share_the_v1_prefix() {
        for p in [AUTH_LOGIN, PINS_CLAIM, TICKETS_ADJUST, PRACTICE_STREAK] {
            assert!(p.starts_with(crate::api::API_V1_PREFIX));
        }
    }
}
