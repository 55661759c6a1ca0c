// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod latency_aware;

use super::registry::PluginFactory;

/// Plugins compiled into the router, in pipeline order
pub fn in_tree() -> Vec<(&'static str, PluginFactory)> {
    vec![(
        latency_aware::NAME,
        latency_aware::LatencyAware::factory as PluginFactory,
    )]
}
