// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

#[cfg(not(any(feature = "bcm_stub", feature = "chaos")))]
compile_error! {"must set bcm_stub or chaos feature"}

// The chaos backend injects failures in front of the stub's hardware model,
// so the stub is always built.
pub mod bcm_stub;

#[cfg(all(feature = "bcm_stub", not(feature = "chaos")))]
mod plat {
    pub use super::bcm_stub::AsicConfig;
    pub use super::bcm_stub::StubHandle as Handle;
}

#[cfg(feature = "chaos")]
pub mod chaos;
#[cfg(feature = "chaos")]
mod plat {
    pub use super::chaos::AsicConfig;
    pub use super::chaos::Handle;
}

pub use plat::AsicConfig;
pub use plat::Handle;
