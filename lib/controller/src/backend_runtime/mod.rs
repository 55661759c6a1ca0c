// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Turning a `BackendRuntime` into the runner container's image, command and arguments.

pub mod parser;
pub mod render;

pub use parser::{BackendRuntimeParser, ParserError};
pub use render::{RenderError, TemplateValues, render_flags};
