//! 工具箱（read_file、list_dir、analyze_project）、关键词路由与执行器

pub mod analyze;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod router;

use std::path::Path;

pub use analyze::AnalyzeProjectTool;
pub use executor::ToolExecutor;
pub use filesystem::{ListDirTool, ReadFileTool, SafeFs};
pub use registry::{Tool, ToolInfo, ToolPermission, ToolRegistry};
pub use router::KeywordToolRouter;

/// 内置工具集，全部绑定到同一工作目录
pub fn default_registry(workspace: &Path) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(ReadFileTool::new(workspace));
    tools.register(ListDirTool::new(workspace));
    tools.register(AnalyzeProjectTool::new(workspace));
    tools
}
