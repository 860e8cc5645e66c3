// Copyright 2024-2025 Irreducible Inc.

/// Builds a [`ViewKindSet`](crate::ViewKindSet) from a list of kinds.
///
/// ```
/// use gpu_view::{view_kinds, ViewKind};
///
/// let kinds = view_kinds![Kernel, MemoryCopy];
/// assert!(kinds.contains(ViewKind::Kernel));
/// assert!(!kinds.contains(ViewKind::MemoryFill));
/// ```
#[macro_export]
macro_rules! view_kinds {
    () => {
        $crate::ViewKindSet::empty()
    };

    (
        $(
            $kind:ident
        ),* $(,)?
    ) => {
        $crate::ViewKindSet::empty()
            $(
                .with($crate::ViewKind::$kind)
            )*
    };
}
