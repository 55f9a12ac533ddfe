use std::cell::RefCell;
use std::rc::Rc;

use crate::toll::TollStation;

/// The standard WASM page size (2^16).
/// See <https://www.w3.org/TR/wasm-core-1/#memory-instances>.
pub const DEFAULT_PAGE_SIZE: u32 = 65536;

/// A reduced page size for constrained embedders. Selected per module via
/// [`ModuleConfig::page_size`] rather than by recompilation.
pub const COMPACT_PAGE_SIZE: u32 = 16384;

/// Absolute ceiling on memory growth when a module declares no maximum:
/// 2^16 pages = 4GiB at the default page size.
pub const DEFAULT_MAX_PAGES: u32 = 65536;

/// Maximum pages assumed for a linker-supplied memory that carries no
/// declared limit of its own.
pub const DEFAULT_EXTERNAL_MAX_PAGES: u32 = 1;

/// A diagnostic text sink.
pub type Logger = Rc<dyn Fn(&str)>;

/// A shared, interior-mutable handle to a toll station, so the same
/// accountant can be observed by the embedder while an instance runs.
pub type SharedTollStation = Rc<RefCell<dyn TollStation>>;

/// Per-module execution options, applied to every instance of the module.
#[derive(Clone, Default)]
pub struct ModuleConfig {
    /// Trap on any floating-point instruction.
    pub disable_float_point: bool,
    /// Per-instruction cost accountant. `None` means unmetered.
    pub toll_station: Option<SharedTollStation>,
    /// Cap on the frame stack depth. `None` means unbounded.
    pub call_depth_limit: Option<usize>,
    /// Convert host-side fatal faults (a panicking host callback) into a
    /// typed error from `call_export` instead of propagating the panic.
    pub recover: bool,
    /// Diagnostic text sink.
    pub logger: Option<Logger>,
    /// Linear memory page size in bytes. Zero selects
    /// [`DEFAULT_PAGE_SIZE`].
    pub page_size: u32,
}

impl ModuleConfig {
    pub(crate) fn effective_page_size(&self) -> u32 {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

impl std::fmt::Debug for ModuleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleConfig")
            .field("disable_float_point", &self.disable_float_point)
            .field("toll_station", &self.toll_station.is_some())
            .field("call_depth_limit", &self.call_depth_limit)
            .field("recover", &self.recover)
            .field("logger", &self.logger.is_some())
            .field("page_size", &self.effective_page_size())
            .finish()
    }
}

/// Options applied to a [`crate::Linker`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkerConfig {
    /// Reject a second definition under the same (module, name) instead of
    /// silently overwriting the first.
    pub disable_shadowing: bool,
}
