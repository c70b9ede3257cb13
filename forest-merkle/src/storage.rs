// Re-export forest-storage traits
pub use forest_storage::{
    Mappable,
    StorageAsMut,
    StorageAsRef,
    StorageInspect,
    StorageMutate,
};
