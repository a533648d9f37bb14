pub mod analytics;
pub mod lot;
pub mod market;
pub mod portfolio;
pub mod price;
pub mod settings;
