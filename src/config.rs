use std::{env, net::SocketAddr};

use url::Url;

use crate::error::AppError;

pub const DEFAULT_DRIVER_BASE_URL: &str = "https://driver-live-tracking.vercel.app";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub driver_base_url: String,
    pub routing_url: Option<Url>,
    pub eta_average_speed_kmh: f64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://tracker.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let driver_base_url = env::var("DRIVER_BASE_URL")
            .map(|raw| raw.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_DRIVER_BASE_URL.to_string());

        let routing_url = match env::var("ROUTING_URL") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                Url::parse(raw.trim())
                    .map_err(|err| AppError::Config(format!("invalid ROUTING_URL: {err}")))?,
            ),
            _ => None,
        };

        let eta_average_speed_kmh = match env::var("ETA_AVERAGE_SPEED_KMH") {
            Ok(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|speed| *speed > 0.0)
                .ok_or_else(|| {
                    AppError::Config(format!("invalid ETA_AVERAGE_SPEED_KMH: {raw}"))
                })?,
            Err(_) => 40.0,
        };

        Ok(Self {
            database_url,
            listen_addr,
            driver_base_url,
            routing_url,
            eta_average_speed_kmh,
        })
    }
}
