// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

pub mod cli;
pub mod clean;
pub mod depfile;
pub mod expand;
pub mod graph;
pub mod log;
pub mod recipe;
pub mod scheduler;
pub mod state;
pub mod util;
pub mod worker;

pub use self::graph::Graph;
pub use self::log::CommandLog;
pub use self::recipe::Recipe;
