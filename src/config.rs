//! Command-line configuration

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

use crate::signaling::ReconnectPolicy;

#[derive(Debug, Clone, Parser)]
#[command(name = "pair-rtc", about = "Anonymous one-to-one video calls", version)]
pub struct Config {
    /// Websocket URL of the pairing relay
    #[arg(long, env = "PAIR_RTC_RELAY_URL", default_value = "ws://127.0.0.1:8080")]
    pub relay_url: String,

    /// Endpoint issuing time-limited ICE server credentials
    #[arg(long, env = "PAIR_RTC_ICE_CREDENTIALS_URL")]
    pub ice_credentials_url: Option<String>,

    /// Timeout for the credential request, in seconds
    #[arg(long, default_value_t = 5)]
    pub ice_timeout_secs: u64,

    /// Consecutive relay connection failures tolerated before giving up
    #[arg(long, default_value_t = 5)]
    pub reconnect_attempts: u32,

    /// Do not send an audio track
    #[arg(long)]
    pub no_audio: bool,

    /// Do not send a video track
    #[arg(long)]
    pub no_video: bool,

    /// Local address to bind the media socket to
    #[arg(long)]
    pub bind: Option<IpAddr>,
}

impl Config {
    pub fn ice_timeout(&self) -> Duration {
        Duration::from_secs(self.ice_timeout_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts.max(1),
            ..ReconnectPolicy::default()
        }
    }
}
