// Pure pricing
pub mod discounts;

// Coupon validation and administration
pub mod coupons;

// Order orchestration
pub mod orders;

// Payment lifecycle and webhook reconciliation
pub mod payments;
