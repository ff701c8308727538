// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{cell::RefCell, collections::HashMap, hash::Hash};

/// Caches the results of a pure function by its argument.
///
/// The argument must be `Eq + Hash`, so floats and arrays can't be keys; key
/// on something with a well-defined identity (e.g. an integer timestamp)
/// instead. Wrapping a function with side effects is a logic error, as it
/// only runs once per distinct argument.
pub struct ResultMemoizer<A, R, F> {
    function: F,
    memoized: RefCell<HashMap<A, R>>,
}

impl<A, R, F> ResultMemoizer<A, R, F>
where
    A: Eq + Hash + Clone,
    R: Clone,
    F: Fn(&A) -> R,
{
    pub fn new(function: F) -> ResultMemoizer<A, R, F> {
        ResultMemoizer {
            function,
            memoized: RefCell::new(HashMap::new()),
        }
    }

    /// Get the result for `args`, running the function only if these
    /// arguments haven't been seen before.
    pub fn call(&self, args: A) -> R {
        if let Some(result) = self.memoized.borrow().get(&args) {
            return result.clone();
        }

        let result = (self.function)(&args);
        self.memoized.borrow_mut().insert(args, result.clone());
        result
    }

    /// The number of distinct arguments seen.
    pub fn len(&self) -> usize {
        self.memoized.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
