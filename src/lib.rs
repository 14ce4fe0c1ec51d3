// SPDX-License-Identifier: Apache-2.0

pub mod bounded_channel;
pub mod config;
pub mod error;
pub mod harvester;
pub mod init;
pub mod input;
pub mod output;
pub mod reader;
pub mod registry;
