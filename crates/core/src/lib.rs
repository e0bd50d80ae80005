pub mod config;
pub mod domain;

pub use chrono;

pub use domain::booking::{
    merge_addons, time_to_minutes, truncate_time, Addon, Booking, BookingId, BookingSlot,
    BookingStatus, SlotId,
};
pub use domain::business::{
    Business, BusinessId, BusinessPolicy, FaqEntry, Service, ServiceAddon, ServiceId,
};
pub use domain::catalog::{Product, ProductId, ProductVariant, VariantId};
pub use domain::conversation::{Conversation, ConversationId, Message, MessageId, MessageRole};
pub use domain::customer::{clamp_lead_score, is_placeholder_name, Customer, CustomerId};
pub use domain::order::{Order, OrderId, OrderStatus};
pub use domain::task_log::{TaskLogEntry, TaskLogId, TaskStatus};
