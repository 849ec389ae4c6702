//! Heap storage for class instances, arrays and boxed values.
//!
//! Objects are never freed: an evaluator lives for one short run, so handles
//! stay valid for its whole lifetime and are plain indices.

use rustc_hash::FxHashMap;
use statetrace_core::{FieldId, TypeHash};

use crate::error::{Result, RuntimeError};
use crate::value::Value;

/// Handle to a heap-allocated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(u32);

impl ObjectHandle {
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Contents of a heap object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectData {
    Fields(FxHashMap<FieldId, Value>),
    Array(Vec<Value>),
    /// A value-type value boxed as `object`.
    Boxed(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    /// Runtime type; the element type for arrays.
    pub ty: TypeHash,
    pub data: ObjectData,
}

#[derive(Debug, Default)]
pub struct ObjectHeap {
    objects: Vec<HeapObject>,
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, object: HeapObject) -> ObjectHandle {
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(object);
        handle
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&HeapObject> {
        self.objects.get(handle.0 as usize)
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut HeapObject> {
        self.objects.get_mut(handle.0 as usize)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Runtime type of the object behind `handle`.
    pub fn type_of(&self, handle: ObjectHandle) -> Result<TypeHash> {
        self.get(handle)
            .map(|object| object.ty)
            .ok_or(RuntimeError::NullReference)
    }

    pub fn field(&self, handle: ObjectHandle, field: FieldId) -> Result<&Value> {
        match self.get(handle).map(|object| &object.data) {
            Some(ObjectData::Fields(fields)) => {
                fields.get(&field).ok_or(RuntimeError::UnknownField(field))
            }
            Some(other) => Err(RuntimeError::mismatch("object with fields", other)),
            None => Err(RuntimeError::NullReference),
        }
    }

    pub fn field_mut(&mut self, handle: ObjectHandle, field: FieldId) -> Result<&mut Value> {
        match self.get_mut(handle).map(|object| &mut object.data) {
            Some(ObjectData::Fields(fields)) => {
                fields.get_mut(&field).ok_or(RuntimeError::UnknownField(field))
            }
            Some(other) => Err(RuntimeError::mismatch("object with fields", other)),
            None => Err(RuntimeError::NullReference),
        }
    }

    pub fn element_mut(&mut self, handle: ObjectHandle, index: usize) -> Result<&mut Value> {
        match self.get_mut(handle).map(|object| &mut object.data) {
            Some(ObjectData::Array(elements)) => {
                let len = elements.len();
                elements.get_mut(index).ok_or(RuntimeError::IndexOutOfRange {
                    index: index as i128,
                    len,
                })
            }
            Some(other) => Err(RuntimeError::mismatch("array", other)),
            None => Err(RuntimeError::NullReference),
        }
    }

    /// Length of an array object.
    pub fn array_len(&self, handle: ObjectHandle) -> Result<usize> {
        match self.get(handle).map(|object| &object.data) {
            Some(ObjectData::Array(elements)) => Ok(elements.len()),
            Some(other) => Err(RuntimeError::mismatch("array", other)),
            None => Err(RuntimeError::NullReference),
        }
    }
}
