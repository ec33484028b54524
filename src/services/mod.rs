// Services sit between handlers and the database/integrations; handlers stay thin
pub mod automation_service;
pub mod cart_service;
pub mod catalog_service;
pub mod checkout_service;
pub mod housekeeping_service;
pub mod notification_service;
pub mod quote_service;
pub mod upload_service;
pub mod webhook_service;

pub use automation_service::AutomationService;
pub use cart_service::CartService;
pub use catalog_service::CatalogService;
pub use checkout_service::CheckoutService;
pub use notification_service::NotificationService;
pub use quote_service::QuoteService;
pub use upload_service::UploadService;
pub use webhook_service::WebhookService;
