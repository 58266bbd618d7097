pub mod env;
pub mod tracing_init;

pub use env::{
    AppConfig, DownstreamConfig, EmployeeIdConfig, InWindow, NotifierConfig, PunchCodes,
    SmtpConfig, SyncSettings, TerminalConfig,
};
pub use tracing_init::{init_tracing, ErrorTail};
