//! Canonicalized types.
//!
//! Types are interned: structurally equal types always resolve to the same [Type] id, so equality
//! between types is a simple integer comparison rather than a structural one.

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;

/// An interned reference to a [TypeData].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(u32);
entity_impl!(Type, "type");

/// The structural definition of a [Type].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeData {
    Void,
    Bool,
    Int(IntTy),
    Float(FloatTy),
    Ptr(Type),
    Array(Type, u64),
    Struct(Vec<Type>),
    Function { params: Vec<Type>, ret: Type },
}

/// Integer types, tagged with signedness and bit width.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct IntTy {
    pub bits: u32,
    pub signed: bool,
}

impl IntTy {
    pub const fn new(bits: u32, signed: bool) -> Self {
        Self { bits, signed }
    }

    /// The largest value representable in this integer type's bit pattern, as an unsigned
    /// wrap-around mask.
    pub fn mask(&self) -> u128 {
        if self.bits >= 128 {
            u128::MAX
        } else {
            (1u128 << self.bits) - 1
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FloatTy {
    F32,
    F64,
}

/// Interns [TypeData] into a dense, de-duplicated table of [Type] ids.
///
/// Owned by the [crate::Module], since types are shared across all functions in a module.
#[derive(Default)]
pub struct TypeInterner {
    types: PrimaryMap<Type, TypeData>,
    index: FxHashMap<TypeData, Type>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `data`, returning the canonical [Type] id for it.
    pub fn intern(&mut self, data: TypeData) -> Type {
        if let Some(ty) = self.index.get(&data) {
            return *ty;
        }
        let ty = self.types.push(data.clone());
        self.index.insert(data, ty);
        ty
    }

    pub fn get(&self, ty: Type) -> &TypeData {
        &self.types[ty]
    }

    pub fn i1(&mut self) -> Type {
        self.intern(TypeData::Bool)
    }

    pub fn int(&mut self, bits: u32, signed: bool) -> Type {
        self.intern(TypeData::Int(IntTy::new(bits, signed)))
    }

    pub fn i32(&mut self) -> Type {
        self.int(32, true)
    }

    pub fn i64(&mut self) -> Type {
        self.int(64, true)
    }

    pub fn f64(&mut self) -> Type {
        self.intern(TypeData::Float(FloatTy::F64))
    }

    pub fn void(&mut self) -> Type {
        self.intern(TypeData::Void)
    }

    pub fn ptr(&mut self, pointee: Type) -> Type {
        self.intern(TypeData::Ptr(pointee))
    }

    pub fn array(&mut self, elem: Type, len: u64) -> Type {
        self.intern(TypeData::Array(elem, len))
    }

    pub fn struct_of(&mut self, fields: Vec<Type>) -> Type {
        self.intern(TypeData::Struct(fields))
    }

    pub fn function(&mut self, params: Vec<Type>, ret: Type) -> Type {
        self.intern(TypeData::Function { params, ret })
    }

    pub fn is_integer(&self, ty: Type) -> bool {
        matches!(self.get(ty), TypeData::Int(_) | TypeData::Bool)
    }

    pub fn is_float(&self, ty: Type) -> bool {
        matches!(self.get(ty), TypeData::Float(_))
    }

    pub fn is_pointer(&self, ty: Type) -> bool {
        matches!(self.get(ty), TypeData::Ptr(_))
    }
}
