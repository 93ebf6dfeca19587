//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// A TURN server entry handed to clients for ICE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN URL (e.g., "turn:turn.example.com:3478")
    pub urls: String,
    /// TURN username
    pub username: String,
    /// TURN credential
    pub credential: String,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8000")
    pub bind_address: String,

    /// JWT signing secret
    pub secret_key: String,

    /// JWT signature algorithm (default: HS256)
    pub algorithm: String,

    /// Access token expiry in minutes (default: 30)
    pub access_token_exp_mins: i64,

    /// KV store (Redis) connection URL
    pub kv_url: String,

    /// Maximum file upload size in bytes (default: 10MB)
    pub max_file_size: usize,

    /// Directory for uploaded files (default: "uploads")
    pub upload_directory: String,

    /// STUN server URLs handed to clients
    pub stun_servers: Vec<String>,

    /// TURN servers handed to clients (optional)
    pub turn_servers: Vec<TurnServer>,

    /// Default room capacity when the descriptor is unknown (default: 10)
    pub max_participants_default: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".into()),
            secret_key: env::var("SECRET_KEY").context("SECRET_KEY must be set")?,
            algorithm: env::var("JWT_ALGORITHM").unwrap_or_else(|_| "HS256".into()),
            access_token_exp_mins: env::var("ACCESS_TOKEN_EXP_MINS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            kv_url: env::var("KV_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024), // 10MB
            upload_directory: env::var("UPLOAD_DIRECTORY").unwrap_or_else(|_| "uploads".into()),
            stun_servers: env::var("STUN_SERVERS").ok().map_or_else(default_stun_servers, |s| {
                s.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            }),
            turn_servers: match env::var("TURN_SERVERS") {
                Ok(json) => {
                    serde_json::from_str(&json).context("TURN_SERVERS must be a JSON array")?
                }
                Err(_) => Vec::new(),
            },
            max_participants_default: env::var("MAX_PARTICIPANTS_DEFAULT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        })
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".into(),
            secret_key: "test-secret".into(),
            algorithm: "HS256".into(),
            access_token_exp_mins: 30,
            kv_url: "redis://localhost:6379".into(),
            max_file_size: 10 * 1024 * 1024,
            upload_directory: "uploads".into(),
            stun_servers: default_stun_servers(),
            turn_servers: Vec::new(),
            max_participants_default: 10,
        }
    }
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".into(),
        "stun:stun1.l.google.com:19302".into(),
        "stun:stun2.l.google.com:19302".into(),
    ]
}
