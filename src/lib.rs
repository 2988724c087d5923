//! outage-bot - A Discord bot that watches a utility's power-outage schedule.
//!
//! This crate provides:
//! - Subscriptions of Discord users to a (city, street, house) address
//! - A scraper driving the utility's cascading address form in a headless browser
//!   (or parsing the static page as a fallback backend)
//! - Change detection by fingerprinting the extracted schedule fragment
//! - Direct-message notifications with a rendered image of the schedule

pub mod bot;
pub mod config;
pub mod detector;
pub mod entity;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod repository;
pub mod scrape;
pub mod service;
pub mod task;
