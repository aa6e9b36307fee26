use areadet::codec::CompressionKind;
use areadet::edf::{write_edf, EdfFrames, EdfImage, EdfOptions, EdfWriteOptions};
use areadet::frame::Container;
use areadet::{ByteOrder, DataType, FormatRegistry, Frame, Header, Image, ImageError, OpenOptions, PixelData};
use std::io::Write;
use std::sync::Arc;
use tempfile::tempdir;

fn ramp(dtype: DataType, shape: Vec<usize>) -> Image {
    let n: usize = shape.iter().product();
    let values: Vec<i64> = (0..n as i64).map(|i| i * 37 - 500).collect();
    Image::new(PixelData::from_i64(dtype, &values), shape)
}

fn edf_block(text: &str) -> Vec<u8> {
    let mut b = text.as_bytes().to_vec();
    let total = (b.len() + 2).div_ceil(512) * 512;
    b.resize(total - 2, b' ');
    b.extend_from_slice(b"}\n");
    b
}

// ── End-to-end write / read ──────────────────────────────────────────────────

#[test]
fn ten_by_ten_roundtrip_preserves_pixels_and_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("frame.edf");

    let values: Vec<i32> = (0..100).collect();
    let image = Image::new(PixelData::I32(values.clone()), vec![10, 10]);
    let header: Header = [("key1", "value1")].into_iter().collect();
    write_edf(&path, &[Frame::new(header, image)], &EdfWriteOptions::default()).unwrap();

    let registry = FormatRegistry::with_defaults();
    assert_eq!(registry.detect_path(&path).unwrap(), "edf");
    let mut container = registry.open(&path, &OpenOptions::default()).unwrap();
    assert_eq!(container.nframes(), 1);
    assert!(!container.is_incomplete());

    let frame = container.get_frame(0).unwrap();
    assert_eq!(frame.shape(), &[10, 10]);
    assert_eq!(frame.dtype(), DataType::I32);
    assert_eq!(frame.data().unwrap(), &PixelData::I32(values));
    assert_eq!(frame.header().get("key1"), Some("value1"));
    // User keys follow the structural ones, in order.
    assert_eq!(frame.header().keys().last(), Some("key1"));
}

#[test]
fn every_compression_and_byte_order_roundtrips() {
    let dir = tempdir().unwrap();
    let kinds = [
        CompressionKind::None,
        CompressionKind::Gzip,
        CompressionKind::Zlib,
        CompressionKind::Bzip2,
        CompressionKind::ByteOffset,
    ];
    for (i, kind) in kinds.into_iter().enumerate() {
        for order in [ByteOrder::LowByteFirst, ByteOrder::HighByteFirst] {
            let path = dir.path().join(format!("c{i}_{}.edf", order.name()));
            let image = ramp(DataType::I16, vec![7, 9]);
            let options = EdfWriteOptions { byte_order: order, compression: kind, general_header: None };
            write_edf(&path, &[Frame::new(Header::new(), image.clone())], &options).unwrap();

            let mut img = EdfImage::open(&path, &EdfOptions::default()).unwrap();
            let frame = img.get_frame(0).unwrap();
            assert_eq!(frame.image().unwrap(), image, "{kind:?} {order:?}");
        }
    }
}

#[test]
fn multi_frame_with_general_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stack.edf");
    let frames: Vec<Frame> = (0..4)
        .map(|i| {
            let header: Header = [("frame_no", i.to_string())].into_iter().collect();
            Frame::new(header, ramp(DataType::F32, vec![3, 5 + i]))
        })
        .collect();
    let general: Header = [("Experiment", "calibration")].into_iter().collect();
    let options = EdfWriteOptions { general_header: Some(general), ..Default::default() };
    write_edf(&path, &frames, &options).unwrap();

    let mut img = EdfImage::open(&path, &EdfOptions::default()).unwrap();
    assert_eq!(img.nframes(), 4);
    assert_eq!(img.general_header().unwrap().get("Experiment"), Some("calibration"));
    for (i, frame) in img.frames().enumerate() {
        let frame = frame.unwrap();
        assert_eq!(frame.index(), i);
        assert_eq!(frame.shape(), &[3, 5 + i]);
        assert_eq!(frame.header().get("frame_no"), Some(i.to_string().as_str()));
        assert_eq!(frame.header().get("Experiment"), Some("calibration"));
        assert_eq!(frame.image().unwrap(), frames[i].image().unwrap());
    }
}

#[test]
fn codec_write_goes_through_registry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("via_registry.edf");
    let registry = FormatRegistry::with_defaults();
    let frame = Frame::new(Header::new(), ramp(DataType::U32, vec![4, 4]));
    registry.get("edf").unwrap().write(&path, &[frame]).unwrap();
    let mut c = registry.open(&path, &OpenOptions::default()).unwrap();
    assert_eq!(c.get_frame(0).unwrap().dtype(), DataType::U32);
}

// ── Access modes ─────────────────────────────────────────────────────────────

#[test]
fn sequential_and_random_access_agree() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seq.edf");
    let frames: Vec<Frame> = (0..3).map(|i| Frame::new(Header::new(), ramp(DataType::U16, vec![2, 2 + i]))).collect();
    let options = EdfWriteOptions { compression: CompressionKind::Gzip, ..Default::default() };
    write_edf(&path, &frames, &options).unwrap();

    let mut random = EdfImage::open(&path, &EdfOptions::default()).unwrap();
    let streamed: Vec<Frame> = EdfFrames::open(&path, &EdfOptions::default())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(streamed.len(), random.nframes());
    for (i, s) in streamed.iter().enumerate() {
        let r = random.get_frame(i).unwrap();
        assert_eq!(s.image().unwrap(), r.image().unwrap());
        assert_eq!(s.header(), r.header());
    }
}

#[test]
fn gzip_wrapped_file_is_transparent() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("w.edf");
    write_edf(&plain, &[Frame::new(Header::new(), ramp(DataType::I32, vec![6, 6]))], &EdfWriteOptions::default()).unwrap();

    let wrapped = dir.path().join("w.edf.gz");
    let mut enc = flate2::write::GzEncoder::new(std::fs::File::create(&wrapped).unwrap(), flate2::Compression::default());
    enc.write_all(&std::fs::read(&plain).unwrap()).unwrap();
    enc.finish().unwrap();

    let registry = FormatRegistry::with_defaults();
    assert_eq!(registry.detect_path(&wrapped).unwrap(), "edf");
    let mut c = registry.open(&wrapped, &OpenOptions::default()).unwrap();
    assert_eq!(c.get_frame(0).unwrap().image().unwrap(), ramp(DataType::I32, vec![6, 6]));

    let streamed: Vec<_> = EdfFrames::open(&wrapped, &EdfOptions::default()).unwrap().collect();
    assert_eq!(streamed.len(), 1);
}

// ── External blobs ───────────────────────────────────────────────────────────

#[test]
fn external_blob_is_read_relative_to_the_file() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("pixels.bin"), [0xEE, 0xEE, 1, 0, 2, 0, 3, 0]).unwrap();
    let header = edf_block(
        "{\nDim_1 = 3 ;\nDataType = UnsignedShort ;\nByteOrder = LowByteFirst ;\n\
         EDF_BinaryFileName = pixels.bin ;\nEDF_BinaryFilePosition = 2 ;\nEDF_BinaryFileSize = 6 ;\n",
    );
    let path = dir.path().join("linked.edf");
    std::fs::write(&path, header).unwrap();

    let mut img = EdfImage::open(&path, &EdfOptions::default()).unwrap();
    assert_eq!(img.nframes(), 1);
    assert_eq!(img.get_frame(0).unwrap().data().unwrap(), &PixelData::U16(vec![1, 2, 3]));
}

#[test]
fn external_blob_falls_back_to_gz() {
    let dir = tempdir().unwrap();
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(&[5, 6, 7, 8]).unwrap();
    std::fs::write(dir.path().join("blob.raw.gz"), enc.finish().unwrap()).unwrap();
    let path = dir.path().join("linked.edf");
    std::fs::write(
        &path,
        edf_block("{\nDim_1 = 4 ;\nDataType = UnsignedByte ;\nEDF_BinaryFileName = blob.raw ;\n"),
    )
    .unwrap();

    let mut img = EdfImage::open(&path, &EdfOptions::default()).unwrap();
    assert_eq!(img.get_frame(0).unwrap().data().unwrap(), &PixelData::U8(vec![5, 6, 7, 8]));
}

// ── Damaged files ────────────────────────────────────────────────────────────

#[test]
fn truncated_blob_is_zero_filled_and_flagged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cut.edf");
    write_edf(&path, &[Frame::new(Header::new(), ramp(DataType::U8, vec![10, 10]))], &EdfWriteOptions::default()).unwrap();
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 30);
    std::fs::write(&path, &bytes).unwrap();

    let mut img = EdfImage::open(&path, &EdfOptions::default()).unwrap();
    assert!(img.is_incomplete());
    let frame = img.get_frame(0).unwrap();
    assert!(frame.incomplete_data());
    let data = frame.data().unwrap().to_i64_vec();
    assert_eq!(data.len(), 100);
    assert!(data[70..].iter().all(|&v| v == 0));
}

#[test]
fn header_split_across_block_boundary_parses_like_aligned() {
    let body = "{\nDim_1 = 2 ;\nDim_2 = 1 ;\nDataType = UnsignedByte ;\nSize = 2 ;\n";
    let mut split = body.as_bytes().to_vec();
    split.resize(511, b' ');
    split.extend_from_slice(b"}\n\x07\x09");
    let mut aligned = body.as_bytes().to_vec();
    aligned.resize(510, b' ');
    aligned.extend_from_slice(b"}\n\x07\x09");

    let registry = FormatRegistry::with_defaults();
    let read = |bytes: Vec<u8>| {
        let source = areadet::Source::from_bytes("mem", bytes);
        let mut c = registry.open_reader(source, &OpenOptions::default()).unwrap();
        let f = c.get_frame(0).unwrap();
        (f.header().clone(), f.data().unwrap().clone())
    };
    assert_eq!(read(split), read(aligned));
}

#[test]
fn runaway_header_respects_size_guard() {
    let mut bytes = b"{\nDim_1 = 1 ;\n".to_vec();
    bytes.resize(64 * 1024, b' ');
    let options = EdfOptions { max_header_size: 4096, ..Default::default() };
    let err = EdfImage::from_source(areadet::Source::from_bytes("mem", bytes), &options).unwrap_err();
    assert!(matches!(err, ImageError::MalformedHeader { .. }));
}

#[test]
fn overflowing_dimensions_are_malformed() {
    let header = edf_block("{\nDim_1 = 4294967296 ;\nDim_2 = 4294967297 ;\nDataType = UnsignedByte ;\n");
    let err = EdfImage::from_source(areadet::Source::from_bytes("mem", header), &EdfOptions::default()).unwrap_err();
    assert!(matches!(err, ImageError::MalformedHeader { .. }), "{err}");

    // Pixel count fits, byte size does not.
    let header = edf_block(&format!("{{\nDim_1 = {} ;\nDataType = DoubleValue ;\n", usize::MAX / 2));
    let err = EdfImage::from_source(areadet::Source::from_bytes("mem", header), &EdfOptions::default()).unwrap_err();
    assert!(matches!(err, ImageError::MalformedHeader { .. }), "{err}");
}

#[test]
fn huge_frame_on_tiny_file_is_rejected_before_allocating() {
    let mut file = edf_block("{\nDim_1 = 1048576 ;\nDim_2 = 1048576 ;\nDataType = UnsignedByte ;\nSize = 2 ;\n");
    file.extend_from_slice(&[1, 2]);
    let err = EdfImage::from_source(areadet::Source::from_bytes("mem", file.clone()), &EdfOptions::default()).unwrap_err();
    assert!(matches!(err, ImageError::MalformedHeader { .. }), "{err}");

    let mut frames = EdfFrames::new(std::io::Cursor::new(file), "mem", &EdfOptions::default());
    assert!(matches!(frames.next(), Some(Err(ImageError::MalformedHeader { .. }))));
}

#[test]
fn oversized_later_frame_keeps_earlier_ones() {
    let mut file = edf_block("{\nDim_1 = 4 ;\nDataType = UnsignedByte ;\n");
    file.extend_from_slice(&[1, 2, 3, 4]);
    file.extend(edf_block("{\nDim_1 = 64 ;\nDataType = UnsignedByte ;\n"));
    file.extend_from_slice(&[0; 64]);
    let options = EdfOptions { max_frame_size: 16, ..Default::default() };

    let mut img = EdfImage::from_source(areadet::Source::from_bytes("mem", file), &options).unwrap();
    assert_eq!(img.nframes(), 1);
    assert!(img.is_incomplete());
    assert_eq!(img.get_frame(0).unwrap().data().unwrap(), &PixelData::U8(vec![1, 2, 3, 4]));
}

// ── Header edge cases ────────────────────────────────────────────────────────

#[test]
fn unknown_compression_reads_raw_bytes() {
    let mut file = edf_block("{\nDim_1 = 2 ;\nDataType = UnsignedByte ;\nCompression = LZW ;\nSize = 2 ;\n");
    file.extend_from_slice(&[4, 5]);
    let mut img = EdfImage::from_source(areadet::Source::from_bytes("mem", file), &EdfOptions::default()).unwrap();
    let frame = img.get_frame(0).unwrap();
    assert_eq!(frame.data().unwrap(), &PixelData::U8(vec![4, 5]));
    assert!(!frame.incomplete_data());
    assert_eq!(frame.header().get("Compression"), Some("LZW"));
}

#[test]
fn general_block_after_a_frame_is_ignored() {
    let mut file = edf_block("{\nDim_1 = 1 ;\nDataType = UnsignedByte ;\n");
    file.push(7);
    file.extend(edf_block("{\nEDF_DataFormatVersion = 2.30 ;\nExperiment = late ;\n"));
    file.extend(edf_block("{\nDim_1 = 1 ;\nDataType = UnsignedByte ;\n"));
    file.push(8);

    let mut img = EdfImage::from_source(areadet::Source::from_bytes("mem", file.clone()), &EdfOptions::default()).unwrap();
    assert_eq!(img.nframes(), 2);
    assert!(img.general_header().is_none());
    assert!(!img.is_incomplete());
    let second = img.get_frame(1).unwrap();
    assert_eq!(second.data().unwrap(), &PixelData::U8(vec![8]));
    assert_eq!(second.header().get("Experiment"), None);

    let streamed: Vec<Frame> = EdfFrames::new(std::io::Cursor::new(file), "mem", &EdfOptions::default())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(streamed.len(), 2);
    assert_eq!(streamed[1].header().get("Experiment"), None);
}

#[test]
fn frames_outlive_their_container() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("own.edf");
    write_edf(&path, &[Frame::new(Header::new(), ramp(DataType::I8, vec![3]))], &EdfWriteOptions::default()).unwrap();
    let frame = {
        let mut img = EdfImage::open(&path, &EdfOptions::default()).unwrap();
        let info = Arc::clone(img.info());
        let f = img.get_frame(0).unwrap();
        drop(img);
        drop(info);
        f
    };
    assert!(frame.container().is_none());
    assert_eq!(frame.data().unwrap().len(), 3);
}
