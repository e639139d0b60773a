pub const MAX_HARTS: usize = 8; // upper bound on harts sharing one PIC

/// Claim ids are 8 bits wide, so at most 256 sources (source 0 included).
pub const PIC_MAX_SOURCES: usize = 256;

pub const REG32_BYTE_WIDTH: usize = 4;
pub const REG32_BIT_WIDTH: u32 = 32;

// --- PIC memory-mapped register banks (offsets from the PIC base) ---

/// Priority level of source S at `+ 4 * S`.
pub const PIC_MEIPL_OFFSET: usize = 0x0000;
/// Pending bits, 32 sources per word.
pub const PIC_MEIP_OFFSET: usize = 0x1000;
/// Pending bits visible to the reading hart only (delegated sources).
pub const PIC_MEITP_OFFSET: usize = 0x1800;
/// Enable of source S at `+ 4 * S`, bit 0.
pub const PIC_MEIE_OFFSET: usize = 0x2000;
/// PIC configuration, bit 0 selects the priority order.
pub const PIC_MPICCFG_OFFSET: usize = 0x3000;
/// Gateway configuration of source S: polarity bit 0, type bit 1.
pub const PIC_MEIGWCTRL_OFFSET: usize = 0x4000;
/// Gateway clear of source S, any write clears the latched pending state.
pub const PIC_MEIGWCLR_OFFSET: usize = 0x5000;
/// Hart delegation of source S.
pub const PIC_MEIDEL_OFFSET: usize = 0x6000;
/// Size of the whole PIC window.
pub const PIC_WINDOW_SIZE: usize = 0x7000;

pub const MEIPL_PRIORITY_MASK: u32 = 0x0000_000F;
pub const MEIE_INT_EN_MASK: u32 = 0x0000_0001;
pub const MPICCFG_PRIORD_MASK: u32 = 0x0000_0001;
pub const MEIGWCTRL_POLARITY_BIT_OFFSET: u32 = 0;
pub const MEIGWCTRL_TYPE_BIT_OFFSET: u32 = 1;

// --- priorities ---

pub const EXT_INT_PRIORITY_0: u32 = 0;
pub const EXT_INT_PRIORITY_1: u32 = 1;
pub const EXT_INT_PRIORITY_14: u32 = 14;
pub const EXT_INT_PRIORITY_15: u32 = 15;
pub const EXT_INT_THRESHOLD_MAX: u32 = 15;

// --- CSR numbers ---

pub const CSR_MSTATUS: u16 = 0x300;
pub const CSR_MHARTID: u16 = 0xF14;

pub const CSR_MEIVT: u16 = 0xBC8; // external interrupts vector table
pub const CSR_MEIPT: u16 = 0xBC9; // priority threshold
pub const CSR_MEICPCT: u16 = 0xBCA; // claim id / priority capture trigger
pub const CSR_MEICIDPL: u16 = 0xBCB; // claim id's priority level
pub const CSR_MEICURPL: u16 = 0xBCC; // current priority level
pub const CSR_MEIHAP: u16 = 0xFC8; // handler address pointer

pub const CSR_MITCNT0: u16 = 0x7D2;
pub const CSR_MITBND0: u16 = 0x7D3;
pub const CSR_MITCTL0: u16 = 0x7D4;
pub const CSR_MITCNT1: u16 = 0x7D5;
pub const CSR_MITBND1: u16 = 0x7D6;
pub const CSR_MITCTL1: u16 = 0x7D7;

pub const MSTATUS_MIE: usize = 1 << 3;

pub const MEIPT_PRITHRESH_MASK: usize = 0x0000_000F;
pub const MEIVT_BASE_MASK: usize = !0x3FF; // bits 10..XLEN
pub const MEIHAP_CLAIMID_MASK: usize = 0x0000_03FC; // bits 2..9
pub const MEIHAP_CLAIMID_SHIFT: u32 = 2;
pub const MEICPCT_CAPTURE: usize = 1;
pub const MEICIDPL_CLIDPRI_MASK: usize = 0x0000_000F;
pub const MEICURPL_CURRPRI_MASK: usize = 0x0000_000F;

/// Vector tables must be aligned to the bits `meivt` ignores.
pub const VECTOR_TABLE_ALIGN: usize = 1024;

pub const LEAST_SIGNIFICANT_32_BIT_MASK: u64 = 0xFFFF_FFFF;
pub const U32_MAX: u32 = 0xFFFF_FFFF;
