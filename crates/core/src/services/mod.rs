pub mod accounting_service;
pub mod analytics_service;
pub mod import_service;
pub mod market_data_service;
pub mod portfolio_service;
pub mod refresh_service;
