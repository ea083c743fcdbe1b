// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities, mocks, and helpers for integration tests

#![allow(dead_code)]

pub mod capture_server;
pub mod helpers;
pub mod mocks;
