//! `stockline-api` — HTTP surface for the reservation/settlement core.

pub mod app;
