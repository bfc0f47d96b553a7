// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod audit;
mod handoff;
mod restart;
mod session_file;

pub use audit::AuditLog;
pub use handoff::{
    clear_save_id, generate_save_id, is_valid_save_id, load_prompt, read_save_id, save_prompt,
    write_restart_context, write_save_id, LOAD_SENTINEL,
};
pub use restart::{
    default_restart_path, take_recent_restart, write_restart_pointer, RestartPointer,
};
pub use session_file::SessionFileStore;
