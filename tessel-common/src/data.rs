// Copyright 2019 The Druid Authors.
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

//! Traits for handling value types.

/// Values that can be compared cheaply to decide whether something must be rendered again.
///
/// `same` is an identity-or-value comparison: reference types compare by pointer,
/// plain values by equality.
pub trait Data: Clone + 'static {
    fn same(&self, other: &Self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::Data;
    use crate::{Array, Object, Value};

    #[test]
    fn scope_values() {
        assert!(Value::Number(f64::NAN).same(&Value::Number(f64::NAN)));
        assert!(Value::from("a").same(&Value::from("a")));
        assert!(!Value::from(1).same(&Value::from("1")));
        let o = Object::new();
        assert!(Value::from(o.clone()).same(&Value::from(o)));
        assert!(!Value::from(Object::new()).same(&Value::from(Object::new())));
        assert!(!Value::from(Array::new()).same(&Value::from(Array::new())));
    }
}
