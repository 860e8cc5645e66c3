// Copyright 2024-2025 Irreducible Inc.

pub mod external_correlation;
pub mod init_tracing;
