//! レジスタスナップショット

use nix::libc::user_regs_struct;

/// 汎用レジスタの本数（x86_64）
pub const GPR_COUNT: usize = 16;

/// 汎用レジスタ名（ハードウェアのエンコーディング順）
pub const GPR_NAMES: [&str; GPR_COUNT] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];

/// あるスレッドのある時点でのレジスタ値のコピー
///
/// カーネルから読み出した後は変更されません。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSnapshot {
    /// プログラムカウンタ（RIP）
    pub pc: u64,
    /// スタックポインタ（RSP）
    pub sp: u64,
    /// フラグレジスタ（EFLAGS）
    pub flags: u64,
    /// 汎用レジスタ（`GPR_NAMES` の順）
    pub gpr: [u64; GPR_COUNT],
}

impl RegisterSnapshot {
    /// インデックスで汎用レジスタを取得する
    pub fn gpr(&self, index: usize) -> Option<u64> {
        self.gpr.get(index).copied()
    }

    /// 名前で汎用レジスタを取得する
    pub fn gpr_by_name(&self, name: &str) -> Option<u64> {
        gpr_index(name).and_then(|i| self.gpr(i))
    }
}

/// レジスタ名からインデックスを引く
pub fn gpr_index(name: &str) -> Option<usize> {
    GPR_NAMES.iter().position(|n| n.eq_ignore_ascii_case(name))
}

impl From<user_regs_struct> for RegisterSnapshot {
    fn from(regs: user_regs_struct) -> Self {
        Self {
            pc: regs.rip,
            sp: regs.rsp,
            flags: regs.eflags,
            gpr: [
                regs.rax, regs.rcx, regs.rdx, regs.rbx,
                regs.rsp, regs.rbp, regs.rsi, regs.rdi,
                regs.r8, regs.r9, regs.r10, regs.r11,
                regs.r12, regs.r13, regs.r14, regs.r15,
            ],
        }
    }
}
