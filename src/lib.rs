// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

pub mod rules;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod rules_tests;
#[cfg(test)]
mod store_tests;
