mod settings;

pub use settings::{
    ApiConfig, DeliveryConfig, MessengerConfig, ServerConfig, Settings, WebSocketConfig,
};
