// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Owning, ordered object stacks.
//!
//! [`ObjectStack`] is the single container type used for certificates,
//! extensions and policy information. It owns every item it holds:
//!
//! - dropping the stack destroys every item (deep free)
//! - [`ObjectStack::into_items`] releases only the container and hands the
//!   items back to the caller (shallow free)
//! - [`ObjectStack::take`] moves a single item out to a new owner
//!
//! All freeing operations consume the stack, so a freed stack can never be
//! used again.

use crate::error::StackError;
use std::slice;

/// How [`ObjectStack::free_all`] treats the contained items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreePolicy {
    /// Release the container; items are returned to the caller.
    Shallow,
    /// Release the container and destroy every item.
    Deep,
}

/// Ordered, indexable collection that owns its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStack<T> {
    items: Vec<T>,
    limit: Option<usize>,
}

impl<T> ObjectStack<T> {
    /// Create an empty stack with no size limit.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            limit: None,
        }
    }

    /// Create an empty stack that refuses to grow past `limit` items.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            limit: Some(limit),
        }
    }

    /// Build a stack from `items`, taking ownership of every element.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self { items, limit: None }
    }

    /// Hard limit on the number of items, if any.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Append an item.
    pub fn push(&mut self, item: T) -> Result<(), StackError> {
        if let Some(limit) = self.limit {
            if self.items.len() >= limit {
                return Err(StackError::CapacityExceeded { limit });
            }
        }
        self.items.push(item);
        Ok(())
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the stack holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Borrow the item at `index`.
    pub fn at(&self, index: usize) -> Result<&T, StackError> {
        self.items.get(index).ok_or(StackError::IndexOutOfRange {
            index,
            len: self.items.len(),
        })
    }

    /// First item, if any.
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Last item, if any.
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Iterate over the items in order.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.items.iter()
    }

    /// View the items as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Move the item at `index` out of the stack.
    ///
    /// Later items shift down by one.
    pub fn take(&mut self, index: usize) -> Result<T, StackError> {
        if index >= self.items.len() {
            return Err(StackError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        Ok(self.items.remove(index))
    }

    /// Shallow free: release the container and return its items.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Release the stack according to `policy`.
    ///
    /// Returns the items for [`FreePolicy::Shallow`] and an empty vector for
    /// [`FreePolicy::Deep`].
    pub fn free_all(self, policy: FreePolicy) -> Vec<T> {
        match policy {
            FreePolicy::Shallow => self.items,
            FreePolicy::Deep => Vec::new(),
        }
    }

    /// Release the stack, passing each item to `destructor` in order.
    pub fn free_with<F: FnMut(T)>(self, destructor: F) {
        self.items.into_iter().for_each(destructor);
    }
}

impl<T> Default for ObjectStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for ObjectStack<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T> FromIterator<T> for ObjectStack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for ObjectStack<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a ObjectStack<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
