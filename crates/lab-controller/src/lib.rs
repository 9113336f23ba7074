/*
 * 5D Labs DevsArena - Lab Lifecycle Orchestrator
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Lab controller library
//!
//! Provisions per-user coding labs in Kubernetes: renders and creates the
//! lab's resources, tracks startup progress in the shared lab state store,
//! enforces the concurrent lab cap, and tears labs down on request.

pub mod lab;
pub mod server;

// Re-export commonly used types
pub use lab::{ControllerConfig, Error, LabOrchestrator, Result};
pub use server::{router, AppState};
