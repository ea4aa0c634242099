//! Songbook extraction library: turns page-marked OCR text of scanned
//! songbooks into song records and reconciles them with a curated table.

pub mod classify;
pub mod config;
pub mod db;
pub mod detect;
pub mod metadata;
pub mod models;
pub mod normalize;
pub mod output;
pub mod pages;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod safety;
