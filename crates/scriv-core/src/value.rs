//! The dynamic value model: variants, shared vars, copy-on-write arrays.
//!
//! `Variant` is the closed sum of script value kinds. `Var` is a shared
//! mutable cell holding one variant plus a const lock; array slots and
//! argument registers alias the same cell. `Array` is an insertion-ordered
//! map from hashed keys to vars, shared by handle: assigning a whole array
//! only bumps its reference count, and the first write through an aliased
//! handle copies the entries before mutating (copy-on-write).

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::hash::name_hash;

/// A script value.
#[derive(Clone, Debug)]
pub enum Variant {
    Null,
    Int(i32),
    Real(f32),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Array(Array),
    /// A label reference, resolved to a command index when pushed.
    Label { hash: u32, cmd: i32 },
}

impl Variant {
    pub fn as_int(&self) -> i32 {
        match self {
            Variant::Null | Variant::Bytes(_) | Variant::Array(_) => 0,
            Variant::Int(v) => *v,
            Variant::Real(v) => *v as i32,
            Variant::Str(s) => int_prefix(s),
            Variant::Label { cmd, .. } => *cmd,
        }
    }

    pub fn as_real(&self) -> f32 {
        match self {
            Variant::Null | Variant::Bytes(_) | Variant::Array(_) => 0.0,
            Variant::Int(v) => *v as f32,
            Variant::Real(v) => *v,
            Variant::Str(s) => real_prefix(s),
            Variant::Label { cmd, .. } => *cmd as f32,
        }
    }

    pub fn as_string(&self) -> Rc<str> {
        match self {
            Variant::Null | Variant::Bytes(_) | Variant::Array(_) => Rc::from(""),
            Variant::Int(v) => Rc::from(v.to_string()),
            Variant::Real(v) => Rc::from(fmt_real(*v)),
            Variant::Str(s) => s.clone(),
            Variant::Label { cmd, .. } => Rc::from(cmd.to_string()),
        }
    }

    #[inline]
    pub fn truthy(&self) -> bool {
        self.as_int() != 0
    }

    #[inline]
    pub fn is_real(&self) -> bool {
        matches!(self, Variant::Real(_))
    }

    #[inline]
    pub fn is_str(&self) -> bool {
        matches!(self, Variant::Str(_))
    }
}

/// Format a real the way the engine stringifies floats (`%f`).
pub fn fmt_real(value: f32) -> String {
    format!("{value:.6}")
}

/// C-style leading-numeric-prefix integer parse; non-numeric text is 0.
pub fn int_prefix(text: &str) -> i32 {
    let text = text.trim_start();
    let (neg, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    for b in digits.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + i64::from(b - b'0');
        if value > i64::from(i32::MAX) {
            value = i64::from(i32::MAX);
            break;
        }
    }
    let value = if neg { -value } else { value };
    value as i32
}

/// C-style leading-numeric-prefix float parse; non-numeric text is 0.
pub fn real_prefix(text: &str) -> f32 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let mut seen_digit = false;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        seen_digit = true;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            seen_digit = true;
        }
    }
    if !seen_digit {
        return 0.0;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            end = exp;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    text[..end].parse().unwrap_or(0.0)
}

#[derive(Debug)]
struct VarCell {
    value: Variant,
    is_const: bool,
}

/// A shared mutable cell holding one variant.
///
/// Cloning a `Var` clones the handle, not the value; array slots and
/// argument registers may alias one cell. The const lock rejects
/// assignment through the calc MOVE operator.
#[derive(Clone, Debug)]
pub struct Var {
    inner: Rc<RefCell<VarCell>>,
}

impl Var {
    pub fn new() -> Self {
        Self::from_variant(Variant::Null)
    }

    pub fn from_variant(value: Variant) -> Self {
        Self {
            inner: Rc::new(RefCell::new(VarCell {
                value,
                is_const: false,
            })),
        }
    }

    /// Clone the current value out of the cell.
    pub fn get(&self) -> Variant {
        self.inner.borrow().value.clone()
    }

    /// Replace the value. Clears the const lock, like every direct store.
    pub fn set(&self, value: Variant) {
        let mut cell = self.inner.borrow_mut();
        cell.is_const = false;
        cell.value = value;
    }

    pub fn set_int(&self, value: i32) {
        self.set(Variant::Int(value));
    }

    pub fn set_real(&self, value: f32) {
        self.set(Variant::Real(value));
    }

    pub fn set_str(&self, value: &str) {
        self.set(Variant::Str(Rc::from(value)));
    }

    /// Copy semantics of variable assignment: primitives by value, arrays
    /// and strings by handle (refcount bump; copy-on-write defers the deep
    /// copy to the first structural mutation of either alias).
    pub fn copy_from(&self, src: &Var) {
        if Rc::ptr_eq(&self.inner, &src.inner) {
            return;
        }
        self.set(src.get());
    }

    /// A fresh cell with a copy of this var's value.
    pub fn duplicate(&self) -> Var {
        Self::from_variant(self.get())
    }

    pub fn is_null(&self) -> bool {
        matches!(self.inner.borrow().value, Variant::Null)
    }

    pub fn is_int(&self) -> bool {
        matches!(self.inner.borrow().value, Variant::Int(_))
    }

    pub fn is_real(&self) -> bool {
        matches!(self.inner.borrow().value, Variant::Real(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.inner.borrow().value, Variant::Str(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.inner.borrow().value, Variant::Array(_))
    }

    pub fn as_int(&self) -> i32 {
        self.inner.borrow().value.as_int()
    }

    pub fn as_real(&self) -> f32 {
        self.inner.borrow().value.as_real()
    }

    pub fn as_string(&self) -> Rc<str> {
        self.inner.borrow().value.as_string()
    }

    pub fn as_bool(&self) -> bool {
        self.as_int() != 0
    }

    pub fn as_bytes(&self) -> Option<Rc<[u8]>> {
        match &self.inner.borrow().value {
            Variant::Bytes(b) => Some(b.clone()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<Array> {
        match &self.inner.borrow().value {
            Variant::Array(a) => Some(a.clone()),
            _ => None,
        }
    }

    /// Number of entries when the value is an array, else 0.
    pub fn count(&self) -> usize {
        self.as_array().map_or(0, |a| a.len())
    }

    pub fn lock_const(&self) {
        self.inner.borrow_mut().is_const = true;
    }

    pub fn is_const(&self) -> bool {
        self.inner.borrow().is_const
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Var) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Array handle for mutation, vivifying a non-array value and applying
    /// copy-on-write when the current array is aliased elsewhere.
    pub fn array_for_write(&self) -> Array {
        let mut cell = self.inner.borrow_mut();
        match &mut cell.value {
            Variant::Array(arr) => {
                if arr.is_shared() {
                    *arr = arr.deep_copy();
                }
                arr.clone()
            }
            other => {
                let arr = Array::new();
                *other = Variant::Array(arr.clone());
                arr
            }
        }
    }
}

impl Default for Var {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    name: Rc<str>,
    var: Var,
}

#[derive(Debug, Default)]
struct ArrayObj {
    entries: IndexMap<u32, Slot>,
    next_index: i32,
}

/// Insertion-ordered map from hashed keys to vars.
#[derive(Clone, Debug)]
pub struct Array {
    inner: Rc<RefCell<ArrayObj>>,
}

impl Array {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ArrayObj::default())),
        }
    }

    /// True when another handle aliases this array. The handle held by the
    /// owning variant is the baseline count of one.
    #[inline]
    pub fn is_shared(&self) -> bool {
        Rc::strong_count(&self.inner) > 1
    }

    /// One-level copy: fresh cells per entry; nested arrays and strings
    /// stay aliased until their own first mutation.
    pub fn deep_copy(&self) -> Array {
        let copy = Array::new();
        {
            let src = self.inner.borrow();
            let mut dst = copy.inner.borrow_mut();
            for (hash, slot) in &src.entries {
                dst.entries.insert(
                    *hash,
                    Slot {
                        name: slot.name.clone(),
                        var: slot.var.duplicate(),
                    },
                );
            }
            dst.next_index = src.next_index;
        }
        copy
    }

    pub fn get(&self, hash: u32) -> Option<Var> {
        self.inner.borrow().entries.get(&hash).map(|s| s.var.clone())
    }

    /// Insert or replace an entry. Numeric names advance the auto index.
    pub fn insert(&self, hash: u32, name: &str, var: Var) {
        let mut obj = self.inner.borrow_mut();
        obj.entries.insert(
            hash,
            Slot {
                name: Rc::from(name),
                var,
            },
        );
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            let num = int_prefix(name);
            if obj.next_index <= num {
                obj.next_index = num + 1;
            }
        }
    }

    /// Append a new slot under the next auto-assigned numeric key.
    pub fn insert_auto(&self, var: Var) -> (u32, Rc<str>) {
        let name: Rc<str> = {
            let obj = self.inner.borrow();
            Rc::from(obj.next_index.to_string())
        };
        let hash = name_hash(&name);
        self.insert(hash, &name, var);
        (hash, name)
    }

    pub fn remove(&self, hash: u32) {
        self.inner.borrow_mut().entries.shift_remove(&hash);
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut obj = self.inner.borrow_mut();
        obj.entries.clear();
        obj.next_index = 0;
    }

    /// Entry by position in insertion order.
    pub fn entry_at(&self, index: usize) -> Option<(Rc<str>, Var)> {
        self.inner
            .borrow()
            .entries
            .get_index(index)
            .map(|(_, slot)| (slot.name.clone(), slot.var.clone()))
    }

    /// Snapshot of `(hash, name, var)` triples in insertion order.
    pub fn snapshot(&self) -> Vec<(u32, Rc<str>, Var)> {
        self.inner
            .borrow()
            .entries
            .iter()
            .map(|(hash, slot)| (*hash, slot.name.clone(), slot.var.clone()))
            .collect()
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}
