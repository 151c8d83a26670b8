// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Stack segments: the linked, heap-allocated frame chain described in
//! `spec.md` §3/§4.2, including reentrant segments for generators and
//! closures.
//!
//! `spec.md` lays the chain out as a flat array of mixed-type cells (value
//! IDs, packed metadata words, back-link pointers) and calls for the
//! discriminator between them to be made explicit rather than inferred from
//! low tag bits (`spec.md` §9: "encode the cell discriminator explicitly").
//! This crate takes that literally: [`Frame`] is a struct with named fields
//! instead of a `buf[capacity]` slice, and [`Segment`] holds a `Vec<Frame>`
//! instead of packing frames back-to-back. The push/pop control flow —
//! unchaining a reentrant top segment around a regular call, re-chaining it
//! on return, allocating a fresh reentrant segment for generator/closure
//! instantiation — follows `spec.md` §4.2 and `original_source/core/kos_stack.c`
//! exactly; only the cell representation is redesigned.

#[cfg(test)]
mod stack_test;

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::value::kfunction::NO_REG;
use crate::value::Value;

/// Index into the segment arena. Stable for the arena's lifetime (segments
/// are never physically removed; a generator's reentrant segment must stay
/// addressable for as long as `KFunction::generator_stack_frame` names it).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SegmentId(pub u32);

/// One active function invocation (`spec.md` §3 "Segment layout").
#[derive(Clone, Debug)]
pub struct Frame {
    pub function: Value,
    pub catch_reg: u8,
    pub catch_offs: Option<u32>,
    pub ip: u32,
    pub regs: Vec<Value>,
    /// Register the resumed value/yielded value is written into on a
    /// generator frame; `NO_REG` for ordinary frames.
    pub gen_reg: u8,
    /// Register in the *caller's* frame that the return value lands in;
    /// `NO_REG` for a tail call or a discarded result.
    pub ret_reg: u8,
}

impl Frame {
    fn new(function: Value, num_regs: u8, gen_reg: u8, ret_reg: u8, ip: u32) -> Self {
        Self {
            function,
            catch_reg: NO_REG,
            catch_offs: None,
            ip,
            regs: alloc::vec![Value::Bad; num_regs as usize],
            gen_reg,
            ret_reg,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.regs.len() + 4
    }
}

/// A chunk of the frame chain. Normal segments may hold several frames and
/// grow by allocating a new predecessor; reentrant segments hold exactly one
/// frame and belong to a single generator or closure for its whole lifetime.
#[derive(Clone, Debug)]
pub struct Segment {
    pub reentrant: bool,
    pub back_link: Option<SegmentId>,
    pub frames: Vec<Frame>,
    pub capacity: usize,
    /// Set when a regular-function push unchained a reentrant top segment;
    /// holds the detached segment so the matching pop can re-chain it
    /// (`spec.md` §4.2 "Edge case").
    pub held_reentrant: Option<SegmentId>,
}

impl Segment {
    fn occupancy(&self) -> usize {
        self.frames.iter().map(Frame::size).sum()
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.occupancy())
    }
}

/// The frame chain for one context. Segments are kept in an arena so a
/// generator's reentrant segment outlives its detachment from the active
/// chain.
pub struct Stack {
    segments: Vec<Segment>,
    top: Option<SegmentId>,
    pub stack_depth: usize,
    initial_segment_capacity: usize,
    max_stack_depth: usize,
}

impl Stack {
    #[must_use]
    pub fn new(initial_segment_capacity: usize, max_stack_depth: usize) -> Self {
        Self {
            segments: Vec::new(),
            top: None,
            stack_depth: 0,
            initial_segment_capacity,
            max_stack_depth,
        }
    }

    #[must_use]
    pub fn top_segment_id(&self) -> Option<SegmentId> {
        self.top
    }

    pub fn segment(&self, id: SegmentId) -> &Segment {
        &self.segments[id.0 as usize]
    }

    pub fn segment_mut(&mut self, id: SegmentId) -> &mut Segment {
        &mut self.segments[id.0 as usize]
    }

    /// Current frame, if any.
    pub fn current_frame(&self) -> Option<&Frame> {
        let id = self.top?;
        self.segments[id.0 as usize].frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        let id = self.top?;
        self.segments[id.0 as usize].frames.last_mut()
    }

    fn alloc_segment(&mut self, reentrant: bool, capacity: usize, back_link: Option<SegmentId>) -> SegmentId {
        let id = SegmentId(self.segments.len() as u32);
        self.segments.push(Segment {
            reentrant,
            back_link,
            frames: Vec::new(),
            capacity,
            held_reentrant: None,
        });
        id
    }

    /// `spec.md` §4.2 `stack_push`. `is_fresh_generator` distinguishes case
    /// "fresh generator/closure" (allocates a reentrant segment) from
    /// "regular" (grows/unchains the normal chain); `resume_segment`
    /// supplies the generator's own segment for the ready/active/running
    /// resume case.
    #[allow(clippy::too_many_arguments)]
    pub fn stack_push(
        &mut self,
        function: Value,
        num_regs: u8,
        gen_reg: u8,
        ret_reg: u8,
        instr_offs: u32,
        kind: PushKind,
    ) -> Result<()> {
        let room = num_regs as usize + 4;
        if self.stack_depth + room > self.max_stack_depth {
            return Err(Error::StackOverflow);
        }

        match kind {
            PushKind::Regular => {
                // Step 5 "Regular": unchain a reentrant top first.
                if let Some(top) = self.top {
                    if self.segments[top.0 as usize].reentrant {
                        let back_link = self.segments[top.0 as usize].back_link;
                        self.top = back_link;
                    }
                    let need_new = match self.top {
                        Some(id) => self.segments[id.0 as usize].remaining() < room,
                        None => true,
                    };
                    let target = if need_new {
                        let new_id =
                            self.alloc_segment(false, self.initial_segment_capacity.max(room), self.top);
                        new_id
                    } else {
                        self.top.unwrap()
                    };
                    if self.segments[top.0 as usize].reentrant {
                        self.segments[target.0 as usize].held_reentrant = Some(top);
                    }
                    self.top = Some(target);
                } else {
                    let new_id = self.alloc_segment(false, self.initial_segment_capacity.max(room), None);
                    self.top = Some(new_id);
                }
                let frame = Frame::new(function, num_regs, gen_reg, ret_reg, instr_offs);
                self.segments[self.top.unwrap().0 as usize].frames.push(frame);
            }
            PushKind::ResumeGenerator(seg_id) => {
                self.segments[seg_id.0 as usize].back_link = self.top;
                self.top = Some(seg_id);
                let frame = self
                    .segments[seg_id.0 as usize]
                    .frames
                    .last_mut()
                    .ok_or(Error::InvalidInstruction)?;
                frame.gen_reg = gen_reg;
                frame.ret_reg = ret_reg;
            }
            PushKind::FreshGeneratorOrClosure => {
                let new_id = self.alloc_segment(true, room + 1, self.top);
                self.top = Some(new_id);
                let frame = Frame::new(function, num_regs, gen_reg, ret_reg, instr_offs);
                self.segments[new_id.0 as usize].frames.push(frame);
            }
        }

        self.stack_depth += room;
        Ok(())
    }

    /// `spec.md` §4.2 `stack_pop`. Returns the popped frame so the caller
    /// can deliver its `ret_reg`/register-window results.
    pub fn stack_pop(&mut self) -> Result<Frame> {
        let top = self.top.ok_or(Error::InvalidInstruction)?;

        let (reentrant, popped) = {
            let seg = &mut self.segments[top.0 as usize];
            let frame = seg.frames.pop().ok_or(Error::InvalidInstruction)?;
            (seg.reentrant, frame)
        };

        self.stack_depth = self.stack_depth.saturating_sub(popped.size());

        if reentrant {
            // Step 3: switch to the segment below; the reentrant segment
            // itself stays alive as the generator's preserved frame.
            self.top = self.segments[top.0 as usize].back_link;
        } else {
            self.top = Some(top);
        }

        self.rechain_or_climb();
        Ok(popped)
    }

    /// Detach the current reentrant top segment from the active chain
    /// *without* removing its frame (`spec.md` §4.3 `YIELD`: "returns
    /// control to caller" while the frame itself survives for resumption).
    /// Also used right after a fresh generator's initial push, which must
    /// leave the new generator suspended rather than run it.
    pub fn stack_suspend(&mut self) -> Result<()> {
        let top = self.top.ok_or(Error::InvalidInstruction)?;
        if !self.segments[top.0 as usize].reentrant {
            return Err(Error::CannotYield);
        }
        let occupancy = self.segments[top.0 as usize].occupancy();
        self.stack_depth = self.stack_depth.saturating_sub(occupancy);
        self.top = self.segments[top.0 as usize].back_link;
        self.rechain_or_climb();
        Ok(())
    }

    /// Step 5 takes priority over step 4's climb: a segment holding a
    /// detached reentrant frame must hand it back before being abandoned as
    /// empty, even if the pop/suspend that just ran left it with no frames
    /// of its own. Shared tail of `stack_pop` and `stack_suspend`.
    fn rechain_or_climb(&mut self) {
        if let Some(id) = self.top {
            if let Some(held) = self.segments[id.0 as usize].held_reentrant.take() {
                self.segments[held.0 as usize].back_link = Some(id);
                self.top = Some(held);
                return;
            }
        }

        // Step 4: climb back-links past now-empty normal segments.
        loop {
            match self.top {
                Some(id) if self.segments[id.0 as usize].frames.is_empty() && !self.segments[id.0 as usize].reentrant => {
                    self.top = self.segments[id.0 as usize].back_link;
                }
                _ => break,
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }
}

/// Which branch of `spec.md` §4.2 step 5 a push belongs to.
#[derive(Clone, Copy, Debug)]
pub enum PushKind {
    Regular,
    ResumeGenerator(SegmentId),
    FreshGeneratorOrClosure,
}
