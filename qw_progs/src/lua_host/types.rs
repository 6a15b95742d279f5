use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use mlua::{
    Error as LuaError, Lua, MetaMethod, Result as LuaResult, UserData, UserDataMethods, Value,
};

/// Three component vector shared by typed entity fields and the Lua `vec3`
/// userdata.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    fn component(&self, key: &Value) -> Option<f32> {
        match component_index(key)? {
            0 => Some(self.x),
            1 => Some(self.y),
            _ => Some(self.z),
        }
    }

    fn component_mut(&mut self, key: &Value) -> Option<&mut f32> {
        match component_index(key)? {
            0 => Some(&mut self.x),
            1 => Some(&mut self.y),
            _ => Some(&mut self.z),
        }
    }
}

fn component_index(key: &Value) -> Option<usize> {
    match key {
        Value::String(name) => match name.to_str().ok()? {
            "x" => Some(0),
            "y" => Some(1),
            "z" => Some(2),
            _ => None,
        },
        Value::Integer(index @ 1..=3) => Some(*index as usize - 1),
        Value::Number(index) if (1.0..=3.0).contains(index) && index.fract() == 0.0 => {
            Some(*index as usize - 1)
        }
        _ => None,
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from(v: [f32; 3]) -> Self {
        Vec3::new(v[0], v[1], v[2])
    }
}

impl From<Vec3> for [f32; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;

    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{} {} {}'", self.x, self.y, self.z)
    }
}

impl UserData for Vec3 {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |_, this, key: Value| {
            Ok(this.component(&key))
        });
        methods.add_meta_method_mut(
            MetaMethod::NewIndex,
            |_, this, (key, value): (Value, Value)| {
                let component = value_to_f32(&value).ok_or_else(|| {
                    LuaError::RuntimeError(format!(
                        "vec3 component must be a number, got {}",
                        value.type_name()
                    ))
                })?;
                let slot = this.component_mut(&key).ok_or_else(|| {
                    LuaError::RuntimeError(format!("vec3 has no component {key:?}"))
                })?;
                *slot = component;
                Ok(())
            },
        );
        methods.add_meta_function(MetaMethod::Add, |lua, (a, b): (Value, Value)| {
            let (a, b) = (expect_vec3(&a)?, expect_vec3(&b)?);
            lua.create_userdata(a + b)
        });
        methods.add_meta_function(MetaMethod::Sub, |lua, (a, b): (Value, Value)| {
            let (a, b) = (expect_vec3(&a)?, expect_vec3(&b)?);
            lua.create_userdata(a - b)
        });
        methods.add_meta_method(MetaMethod::Unm, |lua, this, ()| {
            lua.create_userdata(-*this)
        });
        methods.add_meta_function(MetaMethod::Mul, |lua, (a, b): (Value, Value)| {
            match (vec3_from_value(&a), vec3_from_value(&b)) {
                (Some(a), Some(b)) => Ok(Value::Number(f64::from(a.dot(b)))),
                (Some(v), None) | (None, Some(v)) => {
                    let scale = value_to_f32(&a)
                        .or_else(|| value_to_f32(&b))
                        .ok_or_else(|| LuaError::RuntimeError("vec3 scaled by a non-number".into()))?;
                    Ok(Value::UserData(lua.create_userdata(v * scale)?))
                }
                (None, None) => Err(LuaError::RuntimeError("vec3 multiply without a vec3".into())),
            }
        });
        methods.add_meta_function(MetaMethod::Eq, |_, (a, b): (Value, Value)| {
            Ok(matches!((vec3_from_value(&a), vec3_from_value(&b)), (Some(a), Some(b)) if a == b))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
    }
}

fn expect_vec3(value: &Value) -> LuaResult<Vec3> {
    vec3_from_value(value).ok_or_else(|| {
        LuaError::RuntimeError(format!("expected vec3, got {}", value.type_name()))
    })
}

/// Reads a `vec3` userdata. Anything else is not vector shaped.
pub(crate) fn vec3_from_value(value: &Value) -> Option<Vec3> {
    match value {
        Value::UserData(data) => data.borrow::<Vec3>().ok().map(|vec| *vec),
        _ => None,
    }
}

/// Accepts a `vec3` userdata or a table with `x/y/z` or three array slots.
pub(crate) fn value_to_vec3(value: &Value) -> Option<Vec3> {
    if let Some(vec) = vec3_from_value(value) {
        return Some(vec);
    }
    let Value::Table(table) = value else {
        return None;
    };
    let read = |named: &str, index: i64| -> Option<f32> {
        let by_name = table.raw_get::<_, Value>(named).ok()?;
        let slot = match by_name {
            Value::Nil => table.raw_get::<_, Value>(index).ok()?,
            other => other,
        };
        value_to_f32(&slot)
    };
    Some(Vec3::new(read("x", 1)?, read("y", 2)?, read("z", 3)?))
}

pub(crate) fn push_vec3<'lua>(lua: &'lua Lua, vec: Vec3) -> LuaResult<Value<'lua>> {
    Ok(Value::UserData(lua.create_userdata(vec)?))
}

pub(crate) fn value_to_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Integer(i) => Some(*i as f32),
        Value::Number(n) => Some(*n as f32),
        Value::String(text) => text.to_str().ok()?.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => text.to_str().ok().map(|s| s.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn describe_value(value: &Value) -> String {
    if let Some(text) = value_to_string(value) {
        return text;
    }
    if let Some(vec) = vec3_from_value(value) {
        return vec.to_string();
    }
    format!("<{}>", value.type_name())
}
