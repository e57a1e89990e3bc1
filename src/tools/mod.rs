// The tool surface. Each tool is a typed parameter struct with serde
// defaults matching the published contract, plus an async `call` taking the
// shared server state. Transport is someone else's problem.

pub mod shared;

pub mod code_search;
pub mod exploration;
pub mod gpu_memory;
pub mod navigation;
pub mod refactoring;
pub mod search;
pub mod symbols;
pub mod trace_call_path;
pub mod workspace;

pub use code_search::FindSimilarTool;
pub use exploration::{FastExploreTool, GetArchitectureMapTool};
pub use gpu_memory::GpuMemoryTool;
pub use navigation::{FastLookupTool, FastRefsTool};
pub use refactoring::{RenameSymbolTool, ValidateImportsTool};
pub use search::{FastSearchMultiTool, FastSearchTool};
pub use shared::{OutputFormat, ToolOutput};
pub use symbols::GetSymbolsTool;
pub use trace_call_path::TraceCallPathTool;
pub use workspace::ManageWorkspaceTool;
