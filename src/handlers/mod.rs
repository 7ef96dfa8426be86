pub mod coupons;
pub mod orders;
pub mod payment_webhooks;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::providers::ProviderRegistry;
use crate::repositories::{CouponRepository, OrderRepository, PaymentRepository, ProductRepository};
use crate::services::{coupons::CouponService, orders::OrderService, payments::PaymentService};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub coupons: Arc<CouponService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires repositories and services over one connection pool.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        providers: ProviderRegistry,
        currency: String,
    ) -> Self {
        let coupon_repository = Arc::new(CouponRepository::new(db_pool.clone()));
        let order_repository = Arc::new(OrderRepository::new(db_pool.clone()));
        let payment_repository = Arc::new(PaymentRepository::new(db_pool.clone()));
        let product_repository = Arc::new(ProductRepository::new(db_pool.clone()));

        let coupons = Arc::new(CouponService::new(coupon_repository.clone()));
        let payments = Arc::new(PaymentService::new(
            db_pool.clone(),
            payment_repository,
            order_repository.clone(),
            providers,
            event_sender.clone(),
            currency,
        ));
        let orders = Arc::new(OrderService::new(
            db_pool,
            order_repository,
            product_repository,
            coupon_repository,
            coupons.clone(),
            payments.clone(),
            event_sender,
        ));

        Self {
            orders,
            coupons,
            payments,
        }
    }
}
