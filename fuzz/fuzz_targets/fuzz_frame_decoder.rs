//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences into the streaming ZMTP decoder, both
//! in one piece and split at an input-chosen point, and checks that it
//! never panics, never yields a frame above the size cap, and produces
//! the same frames regardless of how the stream was chunked.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use aepsych_client::rpc::zmtp::{FrameDecoder, MAX_FRAME_SIZE};
use libfuzzer_sys::fuzz_target;

fn drain(decoder: &mut FrameDecoder) -> Vec<aepsych_client::rpc::zmtp::Frame> {
    let mut frames = Vec::new();
    while let Some(f) = decoder.next_frame() {
        assert!(f.body.len() as u64 <= MAX_FRAME_SIZE, "frame exceeds cap");
        frames.push(f);
    }
    frames
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };

    let mut whole = FrameDecoder::new();
    let whole_ok = whole.feed(data).is_ok();
    let whole_frames = drain(&mut whole);

    let cut = (split as usize).min(data.len());
    let mut chunked = FrameDecoder::new();
    let chunked_ok = chunked.feed(&data[..cut]).is_ok() && chunked.feed(&data[cut..]).is_ok();
    let chunked_frames = drain(&mut chunked);

    if whole_ok && chunked_ok {
        assert_eq!(whole_frames, chunked_frames, "chunking changed the frames");
        assert_eq!(whole.take_greeting(), chunked.take_greeting());
    }

    // After a reset the decoder must accept bytes cleanly again.
    whole.reset();
    let _ = whole.feed(data);
});
