//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸）；
//! ReadFileTool / ListDirTool 基于 SafeFs 提供读文件、列目录能力。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use walkdir::WalkDir;

use crate::core::AgentError;
use crate::tools::{Tool, ToolPermission};

/// 单次读取上限，超出部分截断
const MAX_READ_BYTES: usize = 64 * 1024;

/// 遍历时跳过的目录
pub(crate) const SKIP_DIRS: &[&str] = &["target", "node_modules", ".git", "dist", "build"];

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 检查路径是否在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        let canonical = self
            .root_dir
            .join(path)
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", path)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string())) // 如 ../../etc/passwd
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        let mut content = std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))?;
        if content.len() > MAX_READ_BYTES {
            let mut cut = MAX_READ_BYTES;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n... (truncated)");
        }
        Ok(content)
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, AgentError> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {}", e)))?
        {
            let e = e.map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// 文件名包含任一关键词的文件（相对路径，按路径排序，最多 limit 个）
    pub fn find_related_files(&self, keywords: &[String], limit: usize) -> Vec<String> {
        if keywords.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut found: Vec<String> = WalkDir::new(&self.root_dir)
            .max_depth(6)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(&e.file_name().to_string_lossy()))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_lowercase();
                keywords.iter().any(|k| name.contains(k.as_str()))
            })
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&self.root_dir)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        found.sort();
        found.truncate(limit);
        found
    }
}

pub(crate) fn is_skipped(name: &str) -> bool {
    (name.starts_with('.') && name.len() > 1) || SKIP_DIRS.contains(&name)
}

/// 读文件工具
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents. Args: {\"path\": \"file path relative to workspace\"}"
    }

    fn keywords(&self) -> &[&'static str] {
        &["read", "open", "show", "cat", "content", "file", "view"]
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::FileSystem
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        tracing::info!(path = %path, "read_file tool execute");
        self.fs.read_file(path).map_err(|e| e.to_string())
    }
}

/// 列目录工具
pub struct ListDirTool {
    fs: SafeFs,
}

impl ListDirTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory. Args: {\"path\": \"directory path, default '.'\"}"
    }

    fn keywords(&self) -> &[&'static str] {
        &["list", "ls", "directory", "folder", "files", "tree"]
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::FileSystem
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        tracing::info!(path = %path, "list_dir tool execute");
        let entries = self.fs.list_dir(path).map_err(|e| e.to_string())?;
        Ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("src/parser.rs"), "fn parse() {}").unwrap();
        std::fs::write(dir.path().join("src/lexer.rs"), "fn lex() {}").unwrap();
        std::fs::write(dir.path().join("target/parser.rs"), "stale").unwrap();
        dir
    }

    #[test]
    fn test_path_escape_rejected() {
        let dir = workspace();
        let fs = SafeFs::new(dir.path());
        let outside = dir.path().parent().unwrap().to_path_buf();
        assert!(outside.exists());
        let err = fs.resolve("../").unwrap_err();
        assert!(matches!(err, AgentError::PathEscape(_)));
    }

    #[test]
    fn test_find_related_skips_build_dirs() {
        let dir = workspace();
        let fs = SafeFs::new(dir.path());
        let files = fs.find_related_files(&["parser".to_string()], 3);
        assert_eq!(files, vec!["src/parser.rs".to_string()]);
        assert!(fs.find_related_files(&[], 3).is_empty());
    }

    #[tokio::test]
    async fn test_read_and_list_tools() {
        let dir = workspace();
        let read = ReadFileTool::new(dir.path());
        let out = read.execute(json!({"path": "src/lexer.rs"})).await.unwrap();
        assert_eq!(out, "fn lex() {}");

        let list = ListDirTool::new(dir.path());
        let out = list.execute(json!({"path": "src"})).await.unwrap();
        assert_eq!(out, "lexer.rs\nparser.rs");
    }
}
