//! パース関連のユーティリティ関数

use anyhow::Result;
use kazdb_target::{gpr_index, GPR_COUNT};

/// レジスタ指定をインデックスにパース
///
/// レジスタ名（`rax` など）、10進数、または0xプレフィックス付きの16進数をサポート
///
/// # Examples
/// ```
/// use kazdb_core::parse::parse_register;
///
/// assert_eq!(parse_register("rdi").unwrap(), 7);
/// assert_eq!(parse_register("10").unwrap(), 10);
/// assert_eq!(parse_register("0xa").unwrap(), 10);
/// ```
pub fn parse_register(s: &str) -> Result<usize> {
    let s = s.trim();

    let index = if let Some(index) = gpr_index(s) {
        index
    } else if s.starts_with("0x") || s.starts_with("0X") {
        usize::from_str_radix(&s[2..], 16)
            .map_err(|e| anyhow::anyhow!("Invalid register index '{}': {}", s, e))?
    } else {
        s.parse::<usize>()
            .map_err(|_| anyhow::anyhow!("Unknown register '{}'", s))?
    };

    if index >= GPR_COUNT {
        anyhow::bail!("Register index {} out of range (0..{})", index, GPR_COUNT);
    }
    Ok(index)
}

/// カンマ区切りのレジスタ指定をパース
pub fn parse_register_list(s: &str) -> Result<Vec<usize>> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(parse_register)
        .collect()
}
