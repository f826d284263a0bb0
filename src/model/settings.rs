//! Global proxy settings.

use crate::model::backend::LoadBalancePolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub ssl_redirect: bool,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub load_balance: LoadBalancePolicy,
    /// `None` lets the proxy pick one worker per CPU.
    pub worker_processes: Option<u32>,
    pub keep_alive_requests: u32,
    pub hsts: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            ssl_redirect: true,
            connect_timeout_secs: 5,
            read_timeout_secs: 60,
            load_balance: LoadBalancePolicy::RoundRobin,
            worker_processes: None,
            keep_alive_requests: 1000,
            hsts: true,
        }
    }
}
