#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::borrow::{
    Cow,
    ToOwned,
};
use core::marker::PhantomData;

/// Mappable type with `Key` and `Value`.
pub trait Mappable {
    /// The key type is used during interaction with the storage. In most cases, it is the
    /// same as `Self::OwnedKey`.
    type Key: ?Sized + ToOwned;
    /// The owned type of the `Key` retrieving from the storage.
    type OwnedKey: From<<Self::Key as ToOwned>::Owned> + Clone;
    /// The value type is used while setting the value to the storage. In most cases, it
    /// is the same as `Self::OwnedValue`, but it is without restriction and can be
    /// used for performance optimizations.
    type Value: ?Sized + ToOwned;
    /// The owned type of the `Value` retrieving from the storage.
    type OwnedValue: From<<Self::Value as ToOwned>::Owned> + Clone;
}

/// Base read storage trait for a storage-backed data structure.
pub trait StorageInspect<Type: Mappable> {
    type Error;

    /// Retrieve `Cow<Value>` such as `Key->Value`.
    fn get(&self, key: &Type::Key)
        -> Result<Option<Cow<'_, Type::OwnedValue>>, Self::Error>;

    /// Return `true` if there is a `Key` mapping to a value in the storage.
    fn contains_key(&self, key: &Type::Key) -> Result<bool, Self::Error>;
}

/// Base storage trait for mutating a storage-backed data structure.
pub trait StorageMutate<Type: Mappable>: StorageInspect<Type> {
    /// Append `Key->Value` mapping to the storage.
    fn insert(&mut self, key: &Type::Key, value: &Type::Value) -> Result<(), Self::Error> {
        self.replace(key, value).map(|_| ())
    }

    /// Append `Key->Value` mapping to the storage and return the previous value, if any.
    fn replace(
        &mut self,
        key: &Type::Key,
        value: &Type::Value,
    ) -> Result<Option<Type::OwnedValue>, Self::Error>;

    /// Remove `Key->Value` mapping from the storage.
    fn remove(&mut self, key: &Type::Key) -> Result<(), Self::Error> {
        self.take(key).map(|_| ())
    }

    /// Remove `Key->Value` mapping from the storage and return the value, if any.
    fn take(&mut self, key: &Type::Key) -> Result<Option<Type::OwnedValue>, Self::Error>;
}

/// Creates `StorageRef` scoped to a single table of a multi-table storage.
pub trait StorageAsRef {
    fn storage<Type>(&self) -> StorageRef<'_, Self, Type> {
        self.storage_as_ref()
    }

    fn storage_as_ref<Type>(&self) -> StorageRef<'_, Self, Type> {
        StorageRef(self, PhantomData)
    }
}

impl<T> StorageAsRef for T {}

/// Creates `StorageMut` scoped to a single table of a multi-table storage.
pub trait StorageAsMut {
    fn storage<Type>(&mut self) -> StorageMut<'_, Self, Type> {
        self.storage_as_mut()
    }

    fn storage_as_mut<Type>(&mut self) -> StorageMut<'_, Self, Type> {
        StorageMut(self, PhantomData)
    }
}

impl<T> StorageAsMut for T {}

/// Table-scoped read access to a storage.
pub struct StorageRef<'a, T: 'a + ?Sized, Type>(&'a T, PhantomData<Type>);

impl<'a, T: ?Sized, Type> StorageRef<'a, T, Type>
where
    Type: Mappable,
    T: StorageInspect<Type>,
{
    pub fn get(
        &self,
        key: &Type::Key,
    ) -> Result<Option<Cow<'a, Type::OwnedValue>>, T::Error> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &Type::Key) -> Result<bool, T::Error> {
        self.0.contains_key(key)
    }
}

/// Table-scoped write access to a storage.
pub struct StorageMut<'a, T: 'a + ?Sized, Type>(&'a mut T, PhantomData<Type>);

impl<'a, T: ?Sized, Type> StorageMut<'a, T, Type>
where
    Type: Mappable,
    T: StorageMutate<Type>,
{
    pub fn get(
        &self,
        key: &Type::Key,
    ) -> Result<Option<Cow<'_, Type::OwnedValue>>, T::Error> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &Type::Key) -> Result<bool, T::Error> {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: &Type::Key, value: &Type::Value) -> Result<(), T::Error> {
        self.0.insert(key, value)
    }

    pub fn replace(
        &mut self,
        key: &Type::Key,
        value: &Type::Value,
    ) -> Result<Option<Type::OwnedValue>, T::Error> {
        self.0.replace(key, value)
    }

    pub fn remove(&mut self, key: &Type::Key) -> Result<(), T::Error> {
        self.0.remove(key)
    }

    pub fn take(&mut self, key: &Type::Key) -> Result<Option<Type::OwnedValue>, T::Error> {
        self.0.take(key)
    }
}
