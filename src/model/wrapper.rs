//! Wrapping of data source references into model identities.

use crate::types::{ItemRef, Reference, SectionId};

/// Turns references into the identities used by the rendering model.
///
/// Disabled, references pass through as plain identities. Enabled, every
/// reference is paired with its owning section so the same reference shown
/// by two sections stays two distinct items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Wrapper {
    wrapped: bool,
}

impl Wrapper {
    pub fn new(wrapped: bool) -> Self {
        Self { wrapped }
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    pub fn wrap_one(&self, reference: &Reference, section: &SectionId) -> ItemRef {
        if self.wrapped {
            ItemRef::wrapped(reference.clone(), section.clone())
        } else {
            ItemRef::plain(reference.clone())
        }
    }

    pub fn wrap<'a, I>(&self, references: I, section: &SectionId) -> Vec<ItemRef>
    where
        I: IntoIterator<Item = &'a Reference>,
    {
        references
            .into_iter()
            .map(|reference| self.wrap_one(reference, section))
            .collect()
    }

    /// Underlying reference and, for wrapped identities, the owning section.
    pub fn unwrap(&self, item: &ItemRef) -> (Reference, Option<SectionId>) {
        (item.reference().clone(), item.section().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_wrapper_is_identity() {
        let wrapper = Wrapper::new(false);
        let section = SectionId::new("files").unwrap();
        let refs = vec![Reference::new("a"), Reference::new("b")];

        let items = wrapper.wrap(&refs, &section);
        assert_eq!(items, vec![ItemRef::plain("a"), ItemRef::plain("b")]);
        assert_eq!(wrapper.unwrap(&items[0]), (Reference::new("a"), None));
    }

    #[test]
    fn test_wrap_unwrap() {
        let wrapper = Wrapper::new(true);
        let a = SectionId::new("sectionA").unwrap();
        let b = SectionId::new("sectionB").unwrap();
        let reference = Reference::new("doc");

        let in_a = wrapper.wrap_one(&reference, &a);
        assert_ne!(in_a, wrapper.wrap_one(&reference, &b));
        assert_eq!(in_a, wrapper.wrap_one(&reference, &a));
        assert_eq!(wrapper.unwrap(&in_a), (reference, Some(a)));
    }
}
