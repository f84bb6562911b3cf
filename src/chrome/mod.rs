//! Browser discovery, target listing over the `/json/*` HTTP endpoints,
//! and detached auto-launch of a CDP-enabled Chrome instance.

mod discovery;
mod error;
mod launcher;
mod platform;

pub use discovery::{
    BrowserVersion, TargetInfo, close_target, open_target, query_targets, query_version,
};
pub use error::ChromeError;
pub use launcher::{LaunchRequest, launch_detached};
pub use platform::{find_executable, running_browser_lacks_cdp};
