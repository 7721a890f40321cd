//! straybot - chat automation agent for Twitch.
//!
//! Joins chat rooms, runs moderator-defined command templates, vets
//! joining participants against a known-bot registry, and paces
//! LLM-generated conversational replies.

pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod network;
pub mod security;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod template;
