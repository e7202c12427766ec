//! Model test: the segmented stream against a plain byte vector
//!
//! Every sequence of splices, writes and commits must leave the
//! logical stream identical to the same operations applied to a
//! `Vec<u8>`, and a final commit must leave the backing store holding
//! exactly the logical bytes.

use proptest::prelude::*;
use retrovault::io::MemoryBacking;
use retrovault::segment::SegmentedStream;

#[derive(Debug, Clone)]
enum Op {
    Insert { pos: u64, n: u64 },
    Remove { pos: u64, n: u64 },
    Write { pos: u64, data: Vec<u8> },
    Commit,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<u64>(), 0u64..120).prop_map(|(pos, n)| Op::Insert { pos, n }),
        (any::<u64>(), 0u64..120).prop_map(|(pos, n)| Op::Remove { pos, n }),
        (any::<u64>(), proptest::collection::vec(any::<u8>(), 0..80))
            .prop_map(|(pos, data)| Op::Write { pos, data }),
        Just(Op::Commit),
    ]
}

proptest! {
    #[test]
    fn test_stream_matches_vec_model(
        initial in proptest::collection::vec(any::<u8>(), 0..400),
        ops in proptest::collection::vec(op_strategy(), 1..40),
    ) {
        let mut model = initial.clone();
        let mut stream =
            SegmentedStream::open(Box::new(MemoryBacking::from_vec(initial))).unwrap();

        for op in ops {
            match op {
                Op::Insert { pos, n } => {
                    let p = pos % (model.len() as u64 + 1);
                    stream.seek_to(p).unwrap();
                    stream.insert(n).unwrap();
                    model.splice(p as usize..p as usize, std::iter::repeat(0u8).take(n as usize));
                }
                Op::Remove { pos, n } => {
                    if model.is_empty() {
                        continue;
                    }
                    let p = pos % model.len() as u64;
                    let n = n.min(model.len() as u64 - p);
                    stream.seek_to(p).unwrap();
                    stream.remove(n).unwrap();
                    model.drain(p as usize..(p + n) as usize);
                }
                Op::Write { pos, data } => {
                    if model.is_empty() || data.is_empty() {
                        continue;
                    }
                    let p = pos % model.len() as u64;
                    let take = data.len().min(model.len() - p as usize);
                    stream.write_at(p, &data[..take]).unwrap();
                    model[p as usize..p as usize + take].copy_from_slice(&data[..take]);
                }
                Op::Commit => stream.commit().unwrap(),
            }
            prop_assert_eq!(stream.len(), model.len() as u64);
            prop_assert_eq!(stream.read_all().unwrap(), model.clone());
        }

        stream.commit().unwrap();
        prop_assert_eq!(stream.read_all().unwrap(), model);
    }
}
