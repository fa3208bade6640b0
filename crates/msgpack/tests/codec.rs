// Codec properties: writer/reader symmetry and buffered/streaming parity
// for every fragmentation of a payload.

use msgpack::{Fetch, Reader, StreamReader, Writer};
use quickcheck_macros::quickcheck;

#[quickcheck]
fn qc_int_round_trip(v: i64) -> bool {
    let mut w = Writer::new();
    w.write_int(v);
    let bytes = w.into_vec();
    Reader::new(&bytes).read_int().unwrap() == v
}

#[quickcheck]
fn qc_uint_round_trip(v: u64) -> bool {
    let mut w = Writer::new();
    w.write_uint(v);
    let bytes = w.into_vec();
    Reader::new(&bytes).read_uint().unwrap() == v
}

#[quickcheck]
fn qc_str_round_trip(text: String) -> bool {
    let mut w = Writer::new();
    w.write_str(&text);
    let bytes = w.into_vec();
    Reader::new(&bytes).read_str().unwrap() == text
}

#[quickcheck]
fn qc_bin_round_trip(blob: Vec<u8>) -> bool {
    let mut w = Writer::new();
    w.write_bin(&blob);
    let bytes = w.into_vec();
    Reader::new(&bytes).read_bin().unwrap() == blob
}

#[quickcheck]
fn qc_f64_round_trip(v: f64) -> bool {
    let mut w = Writer::new();
    w.write_f64(v);
    let bytes = w.into_vec();
    Reader::new(&bytes).read_f64().unwrap().to_bits() == v.to_bits()
}

#[quickcheck]
fn qc_timestamp_round_trip(seconds: i64, nanos: u32) -> bool {
    let nanos = nanos % 1_000_000_000;
    let mut w = Writer::new();
    w.write_timestamp(seconds, nanos);
    let bytes = w.into_vec();
    Reader::new(&bytes).read_timestamp().unwrap() == (seconds, nanos)
}

// A composite payload exercising every token family.
fn composite() -> Vec<u8> {
    let mut w = Writer::new();
    w.write_map_header(3);
    w.write_str("numbers");
    w.write_array_header(4);
    w.write_int(-1234);
    w.write_uint(u64::MAX);
    w.write_f32(0.25);
    w.write_f64(56.7891122334455);
    w.write_str("blob");
    w.write_bin(&[8, 6, 7, 5, 3, 0, 9]);
    w.write_str("tail");
    w.write_ext(7, &[1, 2, 3, 4]);
    w.into_vec()
}

#[test]
fn test_streaming_matches_buffered_for_every_fragmentation() {
    let bytes = composite();

    for chunk_len in 1..=bytes.len() {
        let mut stream = StreamReader::new();
        let mut fed = 0;

        macro_rules! drive {
            ($try_fn:ident) => {
                loop {
                    match stream.$try_fn().unwrap() {
                        Fetch::Ready(v) => break v,
                        Fetch::More(_) => {
                            let take = chunk_len.min(bytes.len() - fed);
                            assert!(take > 0, "streaming requested bytes past the end");
                            stream.feed(&bytes[fed..fed + take]);
                            fed += take;
                        }
                    }
                }
            };
        }

        assert_eq!(drive!(try_read_map_header), 3);
        assert_eq!(drive!(try_read_str), "numbers");
        assert_eq!(drive!(try_read_array_header), 4);
        assert_eq!(drive!(try_read_int), -1234);
        assert_eq!(drive!(try_read_uint), u64::MAX);
        assert_eq!(drive!(try_read_f32), 0.25);
        assert_eq!(drive!(try_read_f64), 56.7891122334455);
        assert_eq!(drive!(try_read_str), "blob");
        assert_eq!(drive!(try_read_bin), vec![8, 6, 7, 5, 3, 0, 9]);
        assert_eq!(drive!(try_read_str), "tail");
        assert_eq!(drive!(try_read_ext), (7, vec![1, 2, 3, 4]));
        assert_eq!(stream.position() + (bytes.len() - fed), bytes.len());
    }
}

#[test]
fn test_streaming_skip_matches_buffered_skip() {
    let bytes = composite();

    let mut buffered = Reader::new(&bytes);
    buffered.skip_value().unwrap();
    assert!(buffered.is_at_end());

    for chunk_len in [1, 3, 7, bytes.len()] {
        let mut stream = StreamReader::new();
        let mut fed = 0;
        loop {
            match stream.try_skip_value().unwrap() {
                Fetch::Ready(()) => break,
                Fetch::More(_) => {
                    let take = chunk_len.min(bytes.len() - fed);
                    stream.feed(&bytes[fed..fed + take]);
                    fed += take;
                }
            }
        }
        assert_eq!(stream.position(), bytes.len());
    }
}
