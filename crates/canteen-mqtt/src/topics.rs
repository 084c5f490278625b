//! Topics shared between kiosks, the kitchen display and the service desk.

/// Kiosk → kitchen: a paid order, JSON body.
pub const ORDER_NEW: &str = "canteen/order/new";

/// Kiosk → service desk: the diner asked to hurry an order.
pub const SERVICE_URGE: &str = "canteen/service/urge";

/// Service desk → kiosk: the order for a table is ready.
pub const SERVICE_NOTIFY: &str = "canteen/service/notify";

/// Kitchen → kiosks: free-form progress text.
pub const KITCHEN_STATUS: &str = "canteen/kitchen/status";
