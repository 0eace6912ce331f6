//! Slice-level decode state and the macroblock loop.
//!
//! A slice owns one entropy coder for its whole extent, a freshly
//! initialized context bank, the reference lists it may address and a
//! handful of running counters (QP, skip run, reference counts). The
//! loop here walks macroblock addresses in decode order and hands each
//! one to the syntax readers, then polls the end-of-slice condition the
//! way the entropy mode defines it.

use slicedec_core::{BitReader, BitstreamError, DecodeError, Error, Result};
use tracing::{debug, trace};

use crate::context::ContextBank;
use crate::engine::ArithDecoder;
use crate::macroblock::{self, MbMode};
use crate::mode;
use crate::motion;
use crate::neighbor;
use crate::picture::{ColocatedData, Picture, RefPicture, NO_REF_PIC_ID};
use crate::residual;

/// Slice coding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceType {
    #[default]
    I,
    P,
    B,
    /// Switching predictive.
    Sp,
    /// Switching intra.
    Si,
}

impl SliceType {
    /// True for the intra-only slice types.
    pub fn is_intra(self) -> bool {
        matches!(self, SliceType::I | SliceType::Si)
    }
}

/// Slice header fields consumed by the macroblock layer.
#[derive(Debug, Clone, Copy)]
pub struct SliceParams {
    pub slice_type: SliceType,
    /// Slice number stamped into each decoded macroblock. Neighbor
    /// availability for syntax prediction compares it.
    pub slice_nr: i32,
    /// Address of the first macroblock of the slice.
    pub first_mb: usize,
    /// Luma QP after the slice-level delta.
    pub qp: i32,
    /// Context initialization table selector for arithmetic slices.
    pub model_number: u8,
    /// Active reference picture count per list, in frame units.
    pub num_ref_idx_l0_active: usize,
    pub num_ref_idx_l1_active: usize,
    /// Spatial (true) or temporal (false) direct prediction in B slices.
    pub direct_spatial: bool,
    /// Every reference index in this slice's skip runs is zero, letting
    /// skipped 8x8 partitions drop their reference syntax.
    pub allrefzero: bool,
    /// Picture order counts of the current picture.
    pub poc: i32,
    pub top_poc: i32,
    pub bottom_poc: i32,
    /// Deblocking filter control from the slice header.
    pub lf_disable_idc: u8,
    pub lf_alpha_c0_offset: i32,
    pub lf_beta_offset: i32,
}

impl Default for SliceParams {
    fn default() -> Self {
        SliceParams {
            slice_type: SliceType::I,
            slice_nr: 0,
            first_mb: 0,
            qp: 26,
            model_number: 0,
            num_ref_idx_l0_active: 1,
            num_ref_idx_l1_active: 1,
            direct_spatial: true,
            allrefzero: false,
            poc: 0,
            top_poc: 0,
            bottom_poc: 0,
            lf_disable_idc: 0,
            lf_alpha_c0_offset: 0,
            lf_beta_offset: 0,
        }
    }
}

/// Entropy-coded slice payload with the position where macroblock
/// syntax starts.
///
/// The caller parses the slice header elsewhere and hands over the data
/// bytes together with the first syntax bit. Arithmetic slices resume at
/// the next byte boundary, after the alignment bits; bit-serial slices
/// resume at the exact bit.
#[derive(Debug, Clone, Copy)]
pub struct SlicePartition<'a> {
    pub data: &'a [u8],
    /// First bit of macroblock syntax, counted from the start of `data`.
    pub bit_offset: usize,
    /// Significant bits in `data`, trailing stop bit included.
    pub bit_length: usize,
}

impl<'a> SlicePartition<'a> {
    /// Partition covering a whole buffer, starting at its first bit.
    pub fn new(data: &'a [u8]) -> Self {
        SlicePartition {
            data,
            bit_offset: 0,
            bit_length: data.len() * 8,
        }
    }

    /// Payload bytes for the arithmetic decoder.
    fn cabac_bytes(&self) -> &'a [u8] {
        let start = self.bit_offset.div_ceil(8).min(self.data.len());
        &self.data[start..]
    }

    /// Bit reader positioned at the first macroblock syntax bit.
    fn vlc_reader(&self) -> Result<BitReader<'a>> {
        let end = self.bit_length.div_ceil(8).min(self.data.len());
        let mut reader = BitReader::new(&self.data[..end]);
        reader.skip(self.bit_offset)?;
        Ok(reader)
    }
}

/// The one entropy decoder a slice runs on.
#[derive(Debug)]
pub enum EntropyCoder<'a> {
    Cabac(ArithDecoder<'a>),
    Cavlc(BitReader<'a>),
}

impl EntropyCoder<'_> {
    pub fn is_cabac(&self) -> bool {
        matches!(self, EntropyCoder::Cabac(_))
    }
}

/// Reference lists and co-located motion for one slice.
///
/// Six list slots mirror the frame and field views a pair-adaptive
/// picture switches between: slots 0 and 1 hold the frame lists, 2 and 3
/// the top-field lists, 4 and 5 the bottom-field lists. Plain pictures
/// only populate the first two.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceRefs<'a> {
    lists: [&'a [RefPicture]; 6],
    colocated: Option<&'a ColocatedData>,
    colocated_top: Option<&'a ColocatedData>,
    colocated_bottom: Option<&'a ColocatedData>,
}

impl<'a> SliceRefs<'a> {
    pub fn new(list0: &'a [RefPicture], list1: &'a [RefPicture]) -> Self {
        SliceRefs {
            lists: [list0, list1, &[], &[], &[], &[]],
            colocated: None,
            colocated_top: None,
            colocated_bottom: None,
        }
    }

    /// Attach the field reference lists used while a macroblock pair
    /// decodes in field mode.
    pub fn with_field_lists(
        mut self,
        top: [&'a [RefPicture]; 2],
        bottom: [&'a [RefPicture]; 2],
    ) -> Self {
        self.lists[2] = top[0];
        self.lists[3] = top[1];
        self.lists[4] = bottom[0];
        self.lists[5] = bottom[1];
        self
    }

    /// Attach the co-located motion of the first list 1 picture, needed
    /// by B slices.
    pub fn with_colocated(mut self, colocated: &'a ColocatedData) -> Self {
        self.colocated = Some(colocated);
        self
    }

    /// Attach per-field co-located motion for pair-adaptive B slices.
    pub fn with_field_colocated(
        mut self,
        top: &'a ColocatedData,
        bottom: &'a ColocatedData,
    ) -> Self {
        self.colocated_top = Some(top);
        self.colocated_bottom = Some(bottom);
        self
    }

    /// Reference list under the current field offset.
    pub fn list(&self, list: usize, list_offset: usize) -> &'a [RefPicture] {
        self.lists[list + list_offset]
    }

    /// Co-located motion view for direct prediction.
    pub fn colocated_for(&self, field: bool, bottom: bool) -> Option<&'a ColocatedData> {
        if field {
            if bottom {
                self.colocated_bottom
            } else {
                self.colocated_top
            }
        } else {
            self.colocated
        }
    }
}

/// Mutable per-slice decode state threaded through the syntax readers.
pub struct SliceContext<'a> {
    pub params: SliceParams,
    pub coder: EntropyCoder<'a>,
    pub contexts: ContextBank,
    pub refs: SliceRefs<'a>,
    /// Temporal direct scale factor per reference index, one table per
    /// list 0 slot (frame, top field, bottom field). Unused slots stay
    /// empty.
    pub mv_scale: [Vec<i32>; 6],
    /// Address of the macroblock being decoded.
    pub mb_addr: usize,
    /// Running luma QP. Deltas move it; skipped macroblocks inherit it.
    pub qp: i32,
    /// Last decoded QP delta, selecting the delta context.
    pub last_dquant: i32,
    /// Outstanding skip run. -1 means no run has been read yet.
    pub cod_counter: i32,
    /// Active reference counts, doubled while a field macroblock decodes.
    pub num_ref_idx_active: [usize; 2],
    /// Running copy of [`SliceParams::allrefzero`], retargeted by the
    /// 8x8 partition modes as they are decoded.
    pub allrefzero: bool,
    /// Macroblocks decoded by this slice so far.
    pub num_dec_mbs: usize,
}

impl<'a> SliceContext<'a> {
    /// Build the per-slice state over a parsed slice payload. The
    /// entropy mode follows the picture parameters; contexts and
    /// counters start in their defined slice-start states.
    pub fn new(
        pic: &Picture,
        partition: SlicePartition<'a>,
        params: SliceParams,
        refs: SliceRefs<'a>,
    ) -> Result<Self> {
        let coder = if pic.params.entropy_cabac {
            EntropyCoder::Cabac(ArithDecoder::new(partition.cabac_bytes())?)
        } else {
            EntropyCoder::Cavlc(partition.vlc_reader()?)
        };
        let mv_scale = motion::compute_mv_scale(pic, &params, &refs);
        Ok(SliceContext {
            contexts: ContextBank::new(params.qp),
            coder,
            refs,
            mv_scale,
            mb_addr: params.first_mb,
            qp: params.qp,
            last_dquant: 0,
            cod_counter: -1,
            num_ref_idx_active: [params.num_ref_idx_l0_active, params.num_ref_idx_l1_active],
            allrefzero: params.allrefzero,
            num_dec_mbs: 0,
            params,
        })
    }
}

/// Decode every macroblock of one slice into the picture.
///
/// Macroblocks are visited in decode order from the slice's first
/// address; the loop ends when the entropy coder signals the end of the
/// slice or the picture is full.
#[tracing::instrument(skip_all, fields(slice = ctx.params.slice_nr, first_mb = ctx.params.first_mb))]
pub fn decode_slice(pic: &mut Picture, ctx: &mut SliceContext<'_>) -> Result<()> {
    check_slice_inputs(pic, ctx)?;
    loop {
        start_macroblock(pic, ctx)?;
        read_one_macroblock(pic, ctx)?;
        trace!(
            addr = ctx.mb_addr,
            mode = ?pic.mbs[ctx.mb_addr].mode,
            qp = pic.mbs[ctx.mb_addr].qp,
            "macroblock",
        );
        if pic.params.mbaff && pic.mbs[ctx.mb_addr].mb_field {
            ctx.num_ref_idx_active[0] >>= 1;
            ctx.num_ref_idx_active[1] >>= 1;
        }
        // The end-of-slice bin only follows complete pairs.
        let eos_bit = !pic.params.mbaff || ctx.mb_addr % 2 == 1;
        if exit_macroblock(pic, ctx, eos_bit)? {
            break;
        }
    }
    debug!(mbs = ctx.num_dec_mbs, "slice decoded");
    Ok(())
}

/// Reject reference setups the readers would otherwise index blindly.
fn check_slice_inputs(pic: &Picture, ctx: &SliceContext<'_>) -> Result<()> {
    let params = &ctx.params;
    if params.slice_type.is_intra() {
        return Ok(());
    }
    if ctx.refs.list(0, 0).is_empty() {
        return Err(Error::invalid_param("predicted slice with empty reference list 0"));
    }
    if pic.params.mbaff && (ctx.refs.list(0, 2).is_empty() || ctx.refs.list(0, 4).is_empty()) {
        return Err(Error::invalid_param(
            "pair-adaptive predicted slice without field reference lists",
        ));
    }
    if params.slice_type == SliceType::B {
        if ctx.refs.list(1, 0).is_empty() {
            return Err(Error::invalid_param("B slice with empty reference list 1"));
        }
        if pic.params.mbaff && (ctx.refs.list(1, 2).is_empty() || ctx.refs.list(1, 4).is_empty()) {
            return Err(Error::invalid_param(
                "pair-adaptive B slice without field reference lists",
            ));
        }
        if ctx.refs.colocated_for(false, false).is_none() {
            return Err(Error::invalid_param("B slice without co-located motion"));
        }
        if pic.params.mbaff
            && (ctx.refs.colocated_for(true, false).is_none()
                || ctx.refs.colocated_for(true, true).is_none())
        {
            return Err(Error::invalid_param(
                "pair-adaptive B slice without field co-located motion",
            ));
        }
    }
    Ok(())
}

/// Prepare the macroblock record before its syntax is read. Residual
/// and significance state clear here so skipped macroblocks read back
/// empty without touching them again.
fn start_macroblock(pic: &mut Picture, ctx: &mut SliceContext<'_>) -> Result<()> {
    let addr = ctx.mb_addr;
    if addr >= pic.size_in_mbs() {
        return Err(DecodeError::MbAddrOutOfRange {
            addr,
            count: pic.size_in_mbs(),
        }
        .into());
    }
    let mb = &mut pic.mbs[addr];
    mb.reset_for_decode(ctx.params.slice_nr, ctx.params.slice_type, ctx.qp);
    mb.lf_disable_idc = ctx.params.lf_disable_idc;
    mb.lf_alpha_c0_offset = ctx.params.lf_alpha_c0_offset;
    mb.lf_beta_offset = ctx.params.lf_beta_offset;
    residual::reset_coeffs(pic, addr);
    Ok(())
}

/// Read one macroblock's worth of syntax and fill in its side tables.
fn read_one_macroblock(pic: &mut Picture, ctx: &mut SliceContext<'_>) -> Result<()> {
    let addr = ctx.mb_addr;
    let slice_type = ctx.params.slice_type;
    let mbaff = pic.params.mbaff;
    let even = addr % 2 == 0;
    let bframe = slice_type == SliceType::B;
    let cabac = ctx.coder.is_cabac();

    // Skip state of the pair's top half, as seen from the bottom half.
    // A direct macroblock without residual counts as skipped here.
    let prev_mb_skipped = if mbaff && !even {
        let top = &pic.mbs[addr - 1];
        top.mode == MbMode::Skip && (!bframe || top.cbp == 0)
    } else {
        false
    };

    if mbaff {
        pic.mbs[addr].mb_field = if even {
            false
        } else {
            pic.mbs[addr - 1].mb_field
        };
    }

    let raw = if slice_type.is_intra() {
        if mbaff && even {
            let field = mode::read_field_flag(pic, ctx, addr)?;
            pic.mbs[addr].mb_field = field;
        }
        mode::read_mb_type(pic, ctx, addr)?
    } else if cabac {
        // A pair that never coded its top half carries the field flag on
        // whichever half transmits syntax first; until one does, infer it
        // from the neighboring pairs.
        if mbaff && (even || prev_mb_skipped) {
            pic.mbs[addr].mb_field = neighbor::inferred_field_flag(pic, addr);
        }
        let skipped = mode::read_skip_flag(pic, ctx, addr)?;
        if skipped {
            ctx.cod_counter = 0;
        }
        if mbaff {
            let read_top = even && !skipped;
            let read_bottom = !even && prev_mb_skipped && !skipped;
            if read_top || read_bottom {
                let field = mode::read_field_flag(pic, ctx, addr)?;
                pic.mbs[addr].mb_field = field;
            }
            if even && skipped {
                mode::lookahead_bottom_skip(pic, ctx, addr)?;
            }
        }
        if skipped {
            0
        } else {
            mode::read_mb_type(pic, ctx, addr)?
        }
    } else {
        let (value, skipped) = read_mb_header_vlc(pic, ctx, addr, prev_mb_skipped)?;
        pic.mbs[addr].skipped = skipped;
        value
    };

    let interp = macroblock::interpret_mb_mode(&mut pic.mbs[addr], slice_type, raw)?;
    pic.si_block[addr] = interp.si_block;

    if mbaff && pic.mbs[addr].mb_field {
        // Field halves address twice the references; restored after the
        // macroblock in the decode loop.
        ctx.num_ref_idx_active[0] <<= 1;
        ctx.num_ref_idx_active[1] <<= 1;
    }
    if matches!(slice_type, SliceType::P | SliceType::Sp)
        && pic.mbs[addr].mode == MbMode::Inter8x8
    {
        ctx.allrefzero = interp.allrefzero;
    }

    if pic.mbs[addr].mode == MbMode::Inter8x8 {
        mode::read_sub_mb_types(pic, ctx, addr)?;
    }

    if pic.params.constrained_intra_pred
        && matches!(slice_type, SliceType::P | SliceType::B)
        && !pic.mbs[addr].is_intra()
    {
        pic.intra_block[addr] = false;
    }

    init_macroblock(pic, addr);

    // Skipped B direct: no further syntax, motion comes from the
    // co-located picture and the spatial predictors.
    if pic.mbs[addr].is_b_direct() && ctx.cod_counter >= 0 {
        pic.mbs[addr].cbp = 0;
        residual::reset_coeffs(pic, addr);
        motion::fill_direct_motion(pic, ctx, addr)?;
        if cabac {
            ctx.cod_counter = -1;
        }
        return Ok(());
    }
    if pic.mbs[addr].is_p_skip() {
        return motion::fill_skip_motion(pic, ctx, addr);
    }

    if pic.mbs[addr].mode == MbMode::Pcm {
        return mode::read_ipcm(pic, ctx, addr);
    }

    mode::read_ipred_modes(pic, ctx, addr)?;
    if pic.mbs[addr].mode.has_motion_syntax() {
        motion::read_motion_info(pic, ctx, addr)?;
    } else if pic.mbs[addr].is_b_direct() {
        // Direct signalled through the mode code still carries residual,
        // but its motion is derived, not read.
        motion::fill_direct_motion(pic, ctx, addr)?;
    }
    residual::read_cbp_and_coeffs(pic, ctx, addr)
}

/// Macroblock header on a bit-serial slice: the skip run, the field flag
/// placement inside a pair and the raw mode code.
fn read_mb_header_vlc(
    pic: &mut Picture,
    ctx: &mut SliceContext<'_>,
    addr: usize,
    prev_mb_skipped: bool,
) -> Result<(u32, bool)> {
    let mbaff = pic.params.mbaff;
    let even = addr % 2 == 0;
    let p_slice = matches!(ctx.params.slice_type, SliceType::P | SliceType::Sp);

    let EntropyCoder::Cavlc(reader) = &mut ctx.coder else {
        return Err(BitstreamError::Other(
            "bit-serial macroblock header on an arithmetic slice".into(),
        )
        .into());
    };

    if ctx.cod_counter == -1 {
        ctx.cod_counter = reader.read_ue()? as i32;
    }
    if ctx.cod_counter == 0 {
        if mbaff && (even || prev_mb_skipped) {
            pic.mbs[addr].mb_field = reader.read_bit()?;
        }
        let mut value = reader.read_ue()?;
        if p_slice {
            // Code zero belongs to the skip run.
            value += 1;
        }
        ctx.cod_counter -= 1;
        return Ok((value, false));
    }

    ctx.cod_counter -= 1;
    if mbaff && even {
        if ctx.cod_counter == 0 {
            // The pair's field flag rides with the coded bottom half and
            // is consumed there; the top half only looks at it.
            pic.mbs[addr].mb_field = reader.peek_bit()?;
        } else {
            pic.mbs[addr].mb_field = neighbor::inferred_field_flag(pic, addr);
        }
    }
    Ok((0, true))
}

/// Default per-block motion and prediction state, written before the
/// macroblock's own syntax refines it.
fn init_macroblock(pic: &mut Picture, addr: usize) {
    let (mx, my) = neighbor::mb_block_pos(pic, addr);
    let (bx, by) = (mx * 4, my * 4);
    for j in 0..4 {
        for i in 0..4 {
            for list in 0..2 {
                pic.set_mv(list, bx + i, by + j, [0, 0]);
                pic.set_ref_idx(list, bx + i, by + j, -1);
                pic.set_ref_pic_id(list, bx + i, by + j, NO_REF_PIC_ID);
            }
            pic.set_ipred_mode(bx + i, by + j, mode::DC_PRED);
        }
    }
}

/// End-of-slice marker in the active entropy mode. For arithmetic
/// slices the terminate bin is only present when `eos_bit` says so.
fn startcode_follows(ctx: &mut SliceContext<'_>, eos_bit: bool) -> Result<bool> {
    match &mut ctx.coder {
        EntropyCoder::Cabac(decoder) => {
            if eos_bit {
                decoder.decode_terminate()
            } else {
                Ok(false)
            }
        }
        EntropyCoder::Cavlc(reader) => Ok(!reader.more_rbsp_data()),
    }
}

/// Advance past a decoded macroblock. Returns true when the slice is
/// complete.
fn exit_macroblock(pic: &Picture, ctx: &mut SliceContext<'_>, eos_bit: bool) -> Result<bool> {
    ctx.num_dec_mbs += 1;

    let next = ctx.mb_addr + 1;
    if next >= pic.size_in_mbs() {
        // The picture is full; the end marker must be present now. A
        // leftover skip run is reported but the decoded macroblocks
        // stand.
        if !ctx.coder.is_cabac() && ctx.cod_counter > 0 {
            return Err(DecodeError::SkipRunOverrun {
                addr: ctx.mb_addr,
                run: ctx.cod_counter as u32,
            }
            .into());
        }
        if !startcode_follows(ctx, eos_bit)? {
            return Err(BitstreamError::Other(
                "slice data continues past the last macroblock".into(),
            )
            .into());
        }
        return Ok(true);
    }

    ctx.mb_addr = next;
    if !startcode_follows(ctx, eos_bit)? {
        return Ok(false);
    }
    if ctx.params.slice_type.is_intra() || ctx.coder.is_cabac() {
        return Ok(true);
    }
    // On bit-serial predicted slices a pending skip run outlives the
    // payload bits.
    Ok(ctx.cod_counter <= 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture::{PictureParams, PictureStructure};

    fn params(width: usize, height: usize) -> PictureParams {
        PictureParams {
            width_in_mbs: width,
            height_in_mbs: height,
            mbaff: false,
            structure: PictureStructure::Frame,
            entropy_cabac: false,
            constrained_intra_pred: false,
            chroma_qp_index_offset: 0,
            direct_8x8_inference: false,
        }
    }

    fn refpic(id: i64, poc: i32) -> RefPicture {
        RefPicture {
            id,
            poc,
            is_long_term: false,
        }
    }

    #[test]
    fn test_partition_positions() {
        let data = [0xAB, 0xCD, 0xEF];
        let p = SlicePartition {
            data: &data,
            bit_offset: 11,
            bit_length: 24,
        };
        // Arithmetic payload starts at the next byte boundary.
        assert_eq!(p.cabac_bytes(), &data[2..]);

        // The bit reader resumes mid-byte: bit 11 of 0xCD is zero.
        let mut r = p.vlc_reader().unwrap();
        assert_eq!(r.position(), 11);
        assert!(!r.read_bit().unwrap());

        let aligned = SlicePartition::new(&data);
        assert_eq!(aligned.cabac_bytes(), &data[..]);
        assert_eq!(aligned.vlc_reader().unwrap().position(), 0);
    }

    #[test]
    fn test_refs_field_offsets() {
        let frame0 = [refpic(10, 0), refpic(11, 2)];
        let frame1 = [refpic(12, 4)];
        let top0 = [refpic(20, 0)];
        let top1 = [refpic(21, 4)];
        let bot0 = [refpic(30, 1)];
        let bot1 = [refpic(31, 5)];
        let refs = SliceRefs::new(&frame0, &frame1)
            .with_field_lists([&top0, &top1], [&bot0, &bot1]);

        assert_eq!(refs.list(0, 0)[0].id, 10);
        assert_eq!(refs.list(1, 0)[0].id, 12);
        assert_eq!(refs.list(0, 2)[0].id, 20);
        assert_eq!(refs.list(1, 2)[0].id, 21);
        assert_eq!(refs.list(0, 4)[0].id, 30);
        assert_eq!(refs.list(1, 4)[0].id, 31);
    }

    #[test]
    fn test_context_starts_at_slice_defaults() {
        let pic = Picture::new(params(2, 2));
        let data = [0x80];
        let ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                qp: 30,
                first_mb: 1,
                ..SliceParams::default()
            },
            SliceRefs::default(),
        )
        .unwrap();
        assert_eq!(ctx.mb_addr, 1);
        assert_eq!(ctx.qp, 30);
        assert_eq!(ctx.cod_counter, -1);
        assert_eq!(ctx.last_dquant, 0);
        assert_eq!(ctx.num_dec_mbs, 0);
        assert!(!ctx.coder.is_cabac());
    }

    #[test]
    fn test_predicted_slice_needs_references() {
        let mut pic = Picture::new(params(2, 2));
        let data = [0x80];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::P,
                ..SliceParams::default()
            },
            SliceRefs::default(),
        )
        .unwrap();
        let err = decode_slice(&mut pic, &mut ctx).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_b_slice_needs_colocated() {
        let mut pic = Picture::new(params(2, 2));
        let data = [0x80];
        let list0 = [refpic(1, 0)];
        let list1 = [refpic(2, 4)];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::B,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1),
        )
        .unwrap();
        let err = decode_slice(&mut pic, &mut ctx).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_start_macroblock_resets_state() {
        let mut pic = Picture::new(params(2, 2));
        pic.mbs[0].cbp = 47;
        pic.mbs[0].qp = 51;
        pic.coeffs[0][1][2][3][3] = 99;
        pic.nz_coeff[0][1][2] = 5;

        let data = [0x80];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_nr: 3,
                qp: 28,
                lf_disable_idc: 1,
                lf_alpha_c0_offset: 2,
                lf_beta_offset: -2,
                ..SliceParams::default()
            },
            SliceRefs::default(),
        )
        .unwrap();
        start_macroblock(&mut pic, &mut ctx).unwrap();

        let mb = &pic.mbs[0];
        assert_eq!(mb.slice_nr, 3);
        assert_eq!(mb.qp, 28);
        assert_eq!(mb.cbp, 0);
        assert_eq!(mb.lf_disable_idc, 1);
        assert_eq!(mb.lf_alpha_c0_offset, 2);
        assert_eq!(mb.lf_beta_offset, -2);
        assert_eq!(pic.coeffs[0][1][2][3][3], 0);
        assert_eq!(pic.nz_coeff[0][1][2], 0);
    }

    #[test]
    fn test_start_macroblock_rejects_bad_address() {
        let mut pic = Picture::new(params(2, 2));
        let data = [0x80];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                first_mb: 4,
                ..SliceParams::default()
            },
            SliceRefs::default(),
        )
        .unwrap();
        let err = start_macroblock(&mut pic, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::MbAddrOutOfRange { addr: 4, count: 4 })
        ));
    }

    #[test]
    fn test_init_macroblock_defaults() {
        let mut pic = Picture::new(params(2, 2));
        pic.set_mv(0, 5, 5, [3, -3]);
        pic.set_ref_idx(1, 5, 5, 2);
        init_macroblock(&mut pic, 3);
        assert_eq!(pic.mv(0, 5, 5), [0, 0]);
        assert_eq!(pic.ref_idx(1, 5, 5), -1);
        assert_eq!(pic.ref_pic_id(0, 5, 5), NO_REF_PIC_ID);
        assert_eq!(pic.ipred_mode(5, 5), mode::DC_PRED);
        // Blocks of other macroblocks stay put.
        assert_eq!(pic.ipred_mode(0, 0), -1);
    }

    #[test]
    fn test_exit_ends_on_stop_bit() {
        let pic = Picture::new(params(2, 2));
        // One stop bit and nothing else: the payload is exhausted.
        let data = [0x80];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition {
                data: &data,
                bit_offset: 0,
                bit_length: 1,
            },
            SliceParams::default(),
            SliceRefs::default(),
        )
        .unwrap();
        assert!(exit_macroblock(&pic, &mut ctx, true).unwrap());
        assert_eq!(ctx.num_dec_mbs, 1);
        assert_eq!(ctx.mb_addr, 1);
    }

    #[test]
    fn test_exit_reports_leftover_skip_run() {
        let pic = Picture::new(params(2, 2));
        let data = [0x80];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::P,
                ..SliceParams::default()
            },
            SliceRefs::default(),
        )
        .unwrap();
        ctx.mb_addr = 3;
        ctx.cod_counter = 2;
        let err = exit_macroblock(&pic, &mut ctx, true).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            Error::Decode(DecodeError::SkipRunOverrun { addr: 3, run: 2 })
        ));
    }

    #[test]
    fn test_exit_continues_through_pending_run() {
        let pic = Picture::new(params(2, 2));
        let data = [0x80];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition {
                data: &data,
                bit_offset: 0,
                bit_length: 1,
            },
            SliceParams {
                slice_type: SliceType::P,
                ..SliceParams::default()
            },
            SliceRefs::default(),
        )
        .unwrap();
        // The payload is exhausted but two skips are still owed.
        ctx.cod_counter = 2;
        assert!(!exit_macroblock(&pic, &mut ctx, true).unwrap());
        ctx.cod_counter = 0;
        assert!(exit_macroblock(&pic, &mut ctx, true).unwrap());
    }
}
