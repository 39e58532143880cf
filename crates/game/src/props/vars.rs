use super::value::{NetField, NetValue, PropValue};

/// Distinct fields tracked before an entity is treated as fully changed.
pub const MAX_CHANGED_FIELDS: usize = 20;

/// Bounded set of field indices modified since the last delta snapshot.
#[derive(Debug, Clone)]
pub struct ChangedFields {
    fields: [u16; MAX_CHANGED_FIELDS],
    len: usize,
    fully_changed: bool,
}

impl Default for ChangedFields {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangedFields {
    pub fn new() -> Self {
        Self {
            fields: [0; MAX_CHANGED_FIELDS],
            len: 0,
            fully_changed: false,
        }
    }

    pub fn mark(&mut self, field: u16) {
        if self.fully_changed || self.is_changed(field) {
            return;
        }
        if self.len == MAX_CHANGED_FIELDS {
            self.fully_changed = true;
            return;
        }
        self.fields[self.len] = field;
        self.len += 1;
    }

    pub fn mark_all(&mut self) {
        self.fully_changed = true;
    }

    pub fn is_changed(&self, field: u16) -> bool {
        self.fully_changed || self.fields[..self.len].contains(&field)
    }

    pub fn is_fully_changed(&self) -> bool {
        self.fully_changed
    }

    pub fn is_empty(&self) -> bool {
        !self.fully_changed && self.len == 0
    }

    /// Number of tracked fields; meaningless once fully changed.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.fully_changed = false;
    }
}

/// Field storage for one entity, indexed by `NetField`.
#[derive(Debug, Clone, Default)]
pub struct NetworkVars {
    values: Vec<PropValue>,
    changed: ChangedFields,
}

impl NetworkVars {
    pub fn from_values(values: Vec<PropValue>) -> Self {
        Self {
            values,
            changed: ChangedFields::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `None` if the field is not part of this entity's class or holds another type.
    pub fn get<T: NetValue>(&self, field: NetField<T>) -> Option<T> {
        self.values
            .get(field.index() as usize)
            .and_then(T::from_prop)
    }

    /// Stores `value`, marking the field changed only if it differs.
    /// Returns false if the field does not exist or holds another type.
    pub fn set<T: NetValue>(&mut self, field: NetField<T>, value: T) -> bool {
        let index = field.index();
        let Some(slot) = self.values.get_mut(index as usize) else {
            return false;
        };
        if T::from_prop(slot).is_none() {
            log::warn!("Refusing to store {:?} in field {index} holding {slot:?}", T::KIND);
            return false;
        }
        let value = value.into_prop();
        if *slot != value {
            *slot = value;
            self.changed.mark(index);
        }
        true
    }

    pub fn value(&self, index: u16) -> Option<&PropValue> {
        self.values.get(index as usize)
    }

    /// Raw write used by receive proxies. The field is recorded as changed
    /// so update hooks can see what arrived.
    pub fn write(&mut self, index: u16, value: PropValue) -> bool {
        match self.values.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                self.changed.mark(index);
                true
            }
            None => false,
        }
    }

    pub fn changed(&self) -> &ChangedFields {
        &self.changed
    }

    pub fn is_changed<T>(&self, field: NetField<T>) -> bool {
        self.changed.is_changed(field.index())
    }

    pub fn mark_changed(&mut self, index: u16) {
        self.changed.mark(index);
    }

    pub fn mark_fully_changed(&mut self) {
        self.changed.mark_all();
    }

    pub fn reset_changes(&mut self) {
        self.changed.reset();
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    const HEALTH: NetField<i32> = NetField::new(0);
    const ORIGIN: NetField<Vec3> = NetField::new(1);
    const MISSING: NetField<i32> = NetField::new(9);

    fn vars() -> NetworkVars {
        NetworkVars::from_values(vec![PropValue::I32(100), PropValue::Vec3(Vec3::ZERO)])
    }

    #[test]
    fn set_marks_only_real_changes() {
        let mut vars = vars();
        assert!(vars.set(HEALTH, 100));
        assert!(vars.changed().is_empty());

        vars.set(ORIGIN, Vec3::X);
        assert!(vars.is_changed(ORIGIN));
        assert!(!vars.is_changed(HEALTH));
        assert_eq!(vars.get(ORIGIN), Some(Vec3::X));

        assert!(!vars.set(MISSING, 1));
        assert_eq!(vars.get(MISSING), None);
    }

    #[test]
    fn set_keeps_the_slot_type() {
        let mut vars = vars();
        let wrong: NetField<i32> = NetField::new(1);
        assert!(!vars.set(wrong, 5));
        assert_eq!(vars.get(ORIGIN), Some(Vec3::ZERO));
        assert!(vars.changed().is_empty());
    }

    #[test]
    fn duplicate_marks_take_one_slot() {
        let mut changed = ChangedFields::new();
        changed.mark(3);
        changed.mark(3);
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn overflow_saturates_to_fully_changed() {
        let mut changed = ChangedFields::new();
        for field in 0..MAX_CHANGED_FIELDS as u16 {
            changed.mark(field);
        }
        assert!(!changed.is_fully_changed());

        changed.mark(500);
        assert!(changed.is_fully_changed());
        assert!(changed.is_changed(4242));

        changed.reset();
        assert!(changed.is_empty());
        assert!(!changed.is_changed(0));
    }
}
