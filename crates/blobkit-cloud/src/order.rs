//! Name order over listings sorted by physical key.
//!
//! Appending the extension can reorder names: `a-b.gz` lists before `a.gz`
//! although `a` < `a-b`. A name taken from a listing can only be overtaken
//! by a later key whose name is a proper prefix of it, so each name is held
//! back until the listing has moved past every such key.

use std::collections::BTreeSet;

use blobkit_core::PathResolver;

pub(crate) struct NameOrder<'a> {
    paths: &'a PathResolver,
    prefix: &'a str,
    held: BTreeSet<String>,
}

impl<'a> NameOrder<'a> {
    /// Names outside `prefix` are never held, so only stems under it can
    /// still show up.
    pub(crate) fn new(paths: &'a PathResolver, prefix: &'a str) -> Self {
        Self {
            paths,
            prefix,
            held: BTreeSet::new(),
        }
    }

    pub(crate) fn hold(&mut self, name: String) {
        self.held.insert(name);
    }

    /// Smallest held name, if no key listed after `listed` can sort before it.
    pub(crate) fn release(&mut self, listed: &str) -> Option<String> {
        let first = self.held.first()?;
        if self.may_be_overtaken(first, listed) {
            return None;
        }
        self.held.pop_first()
    }

    /// Smallest held name, once the listing is exhausted.
    pub(crate) fn drain(&mut self) -> Option<String> {
        self.held.pop_first()
    }

    fn may_be_overtaken(&self, name: &str, listed: &str) -> bool {
        name.char_indices()
            .skip(1)
            .map(|(idx, _)| &name[..idx])
            .filter(|stem| stem.starts_with(self.prefix))
            .any(|stem| self.paths.object_path(stem).as_str() > listed)
    }
}
