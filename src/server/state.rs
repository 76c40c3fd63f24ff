use std::sync::Arc;

use crate::config::Settings;
use crate::error::Result;
use crate::sorting_station::SortingStation;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sorting_station: Arc<SortingStation>,
}

impl AppState {
    /// Build state and provision every configured messenger
    pub fn new(settings: Settings) -> Result<Self> {
        let sorting_station = Arc::new(SortingStation::from_settings(&settings)?);
        Ok(Self::with_station(settings, sorting_station))
    }

    pub fn with_station(settings: Settings, sorting_station: Arc<SortingStation>) -> Self {
        Self {
            settings: Arc::new(settings),
            sorting_station,
        }
    }
}
