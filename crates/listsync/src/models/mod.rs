//! Domain models for replicated lists

mod item;
mod list;
mod notification;
mod resource;
mod subscription;

pub use item::ItemRecord;
pub use list::ListRecord;
pub use notification::{ChangeNotification, LIST_ITEM_DATA_TYPE, LifecycleNotification};
pub use resource::{
    ColumnMapping, ITEM_METADATA_COLUMNS, ResourceDescriptor, ResourceRef, ResourceSchema,
    TrackedResource,
};
pub use subscription::SubscriptionRecord;
