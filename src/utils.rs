// Copyright 2024-2025 Irreducible Inc.

use cfg_if::cfg_if;

pub fn process_id() -> u32 {
    nix::unistd::getpid().as_raw() as u32
}

cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// Kernel thread id of the calling thread.
        pub fn thread_id() -> u32 {
            nix::unistd::gettid().as_raw() as u32
        }
    } else {
        use std::hash::{Hash, Hasher};

        /// Stable per-thread id derived from the std thread id.
        pub fn thread_id() -> u32 {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::thread::current().id().hash(&mut hasher);
            hasher.finish() as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_ids_differ_between_threads() {
        let main = thread_id();
        let other = std::thread::spawn(thread_id).join().unwrap();
        assert_ne!(main, other);
        assert_eq!(main, thread_id());
        assert!(process_id() > 0);
    }
}
