use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use dtok_core::inference::stub::StubExtractor;
use dtok_core::{
    AudioItem, CodeToSpeech, Codebook, EncodeInput, EncodeOptions, Encoded, ExtractorHandle,
    FeatureExtractor, SpeechTokenizer, TokenizerConfig, TokenizerError, Vocoder,
};
use ndarray::{Array3, ArrayView2};

/// 100 Hz audio, 40-sample chunks, 10-sample tail threshold.
fn small_config(batch_size: Option<usize>) -> TokenizerConfig {
    TokenizerConfig {
        sampling_rate: 100,
        chunk_secs: 0.4,
        tail_merge_secs: 0.1,
        batch_size,
        workers: 2,
        ..TokenizerConfig::default()
    }
}

fn codebook() -> Codebook {
    Codebook::from_rows(vec![vec![0.0], vec![10.0], vec![20.0]]).unwrap()
}

fn stub(hop: usize) -> ExtractorHandle {
    ExtractorHandle::new(StubExtractor::new(hop, 1))
}

fn constant(value: f32, len: usize) -> Vec<f32> {
    vec![value; len]
}

/// Two chunks: 40 samples at 0.0 then 40 at 10.0.
fn two_chunk_item() -> AudioItem {
    let mut samples = constant(0.0, 40);
    samples.extend(constant(10.0, 40));
    AudioItem::new(samples, 100)
}

fn short_item() -> AudioItem {
    AudioItem::new(constant(20.0, 20), 100)
}

#[test]
fn results_follow_submission_order_across_padded_batches() {
    let tokenizer = SpeechTokenizer::new(small_config(Some(3)), codebook(), stub(4)).unwrap();

    let encoded = tokenizer
        .encode(vec![two_chunk_item(), short_item()], &EncodeOptions::default())
        .unwrap();
    let Encoded::Many(items) = encoded else {
        panic!("two inputs must yield a list");
    };

    assert_eq!(items.len(), 2);
    let mut expected = vec![0; 10];
    expected.extend(vec![1; 10]);
    assert_eq!(items[0].code, expected);
    assert_eq!(items[0].merged_code, vec![0, 1]);

    // 20 of 40 padded samples survive: 5 of 10 frames.
    assert_eq!(items[1].code, vec![2; 5]);
    assert_eq!(items[1].merged_code, vec![2]);

    let stats = tokenizer.pipeline_diagnostics_snapshot();
    assert_eq!(stats.items_in, 2);
    assert_eq!(stats.chunks_built, 3);
    assert_eq!(stats.batches_run, 1);
    assert_eq!(stats.frames_quantized, 25);
}

#[test]
fn batch_size_does_not_change_codes() {
    let items = vec![two_chunk_item(), short_item(), two_chunk_item()];
    let mut outputs = Vec::new();
    for batch_size in [1, 2, 5] {
        let tokenizer =
            SpeechTokenizer::new(small_config(Some(batch_size)), codebook(), stub(4)).unwrap();
        outputs.push(
            tokenizer
                .batch_encode(items.clone(), &EncodeOptions::default())
                .unwrap(),
        );
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
}

#[test]
fn single_item_yields_single_result() {
    let tokenizer = SpeechTokenizer::new(small_config(Some(2)), codebook(), stub(4)).unwrap();
    let encoded = tokenizer
        .encode(short_item(), &EncodeOptions::default())
        .unwrap();
    assert!(encoded.is_single());
    assert_eq!(encoded.into_vec()[0].code, vec![2; 5]);
}

#[test]
fn empty_input_is_rejected() {
    let tokenizer = SpeechTokenizer::new(small_config(Some(2)), codebook(), stub(4)).unwrap();
    let err = tokenizer
        .encode(EncodeInput::new(), &EncodeOptions::default())
        .unwrap_err();
    assert!(matches!(err, TokenizerError::InvalidInput(_)));

    let err = tokenizer
        .encode(AudioItem::new(Vec::new(), 100), &EncodeOptions::default())
        .unwrap_err();
    assert!(matches!(err, TokenizerError::InvalidInput(_)));
}

#[test]
fn oversized_explicit_batch_surfaces_resource_exhaustion() {
    let extractor = ExtractorHandle::new(StubExtractor::new(4, 1).with_row_limit(2));
    let tokenizer = SpeechTokenizer::new(small_config(Some(3)), codebook(), extractor).unwrap();

    let err = tokenizer
        .encode(vec![two_chunk_item(), short_item()], &EncodeOptions::default())
        .unwrap_err();
    assert!(err.is_resource_exhaustion(), "{err}");
    assert_eq!(tokenizer.pipeline_diagnostics_snapshot().extraction_errors, 1);
}

#[test]
fn probe_calibrates_batch_size_when_unset() {
    // Sizes 1, 3, 5 succeed; 7 fails → floor(0.95 × 5) = 4.
    let extractor = ExtractorHandle::new(StubExtractor::new(4, 1).with_row_limit(5));
    let tokenizer = SpeechTokenizer::new(small_config(None), codebook(), extractor).unwrap();
    assert_eq!(tokenizer.max_batch_size(), 4);

    let items = tokenizer
        .batch_encode(
            vec![two_chunk_item(), two_chunk_item(), two_chunk_item()],
            &EncodeOptions::default(),
        )
        .unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(tokenizer.pipeline_diagnostics_snapshot().batches_run, 2);
}

#[test]
fn extractor_that_cannot_fit_one_chunk_is_fatal() {
    let extractor = ExtractorHandle::new(StubExtractor::new(4, 1).with_row_limit(0));
    let err = SpeechTokenizer::new(small_config(None), codebook(), extractor).unwrap_err();
    assert!(matches!(err, TokenizerError::FatalResource(_)));
}

struct CountingWarmUp {
    warm_ups: Arc<AtomicUsize>,
    inner: StubExtractor,
}

impl FeatureExtractor for CountingWarmUp {
    fn warm_up(&mut self) -> dtok_core::error::Result<()> {
        self.warm_ups.fetch_add(1, Ordering::SeqCst);
        self.inner.warm_up()
    }

    fn forward(&mut self, batch: ArrayView2<'_, f32>) -> dtok_core::error::Result<Array3<f32>> {
        self.inner.forward(batch)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[test]
fn extractor_is_warmed_up_once_per_tokenizer() {
    let warm_ups = Arc::new(AtomicUsize::new(0));
    let extractor = ExtractorHandle::new(CountingWarmUp {
        warm_ups: Arc::clone(&warm_ups),
        inner: StubExtractor::new(4, 1),
    });
    let tokenizer = SpeechTokenizer::new(small_config(Some(2)), codebook(), extractor).unwrap();
    for _ in 0..3 {
        tokenizer
            .encode(short_item(), &EncodeOptions::default())
            .unwrap();
    }
    assert_eq!(warm_ups.load(Ordering::SeqCst), 1);
}

#[test]
fn beam_and_diff_outputs_cover_every_frame() {
    let tokenizer = SpeechTokenizer::new(small_config(Some(2)), codebook(), stub(4)).unwrap();
    let options = EncodeOptions {
        use_beam: true,
        beam_size: 3,
        return_diff: true,
        ..EncodeOptions::default()
    };
    let item = tokenizer
        .encode(two_chunk_item(), &options)
        .unwrap()
        .into_vec()
        .remove(0);

    let beam = item.beam_code.as_ref().unwrap();
    assert_eq!(beam.len(), item.code.len());
    // Clean constant segments leave nothing for the beam to smooth.
    assert_eq!(beam, &item.code);
    assert_eq!(item.beam_merged_code.as_deref(), Some(&[0, 1][..]));

    let distance = item.distance.as_ref().unwrap();
    assert_eq!(distance.len(), 20);
    assert_eq!(distance[0].len(), 3);
    assert!(item
        .center_diff
        .as_ref()
        .unwrap()
        .iter()
        .all(|d| d[0].abs() < 1e-4));
}

#[test]
fn foreign_sample_rate_is_resampled_before_chunking() {
    let tokenizer = SpeechTokenizer::new(small_config(Some(2)), codebook(), stub(4)).unwrap();
    // 80 samples at 200 Hz → 40 samples at 100 Hz → one chunk of 10 frames.
    let item = AudioItem::new(constant(10.0, 80), 200);
    let codes = tokenizer
        .encode(item, &EncodeOptions::default())
        .unwrap()
        .into_vec()
        .remove(0);
    assert_eq!(codes.code.len(), 10);
    assert_eq!(codes.code[5], 1);
}

#[test]
fn wav_files_are_encoded_before_in_memory_items() {
    let path = std::env::temp_dir().join(format!("dtok-encode-{}.wav", std::process::id()));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 100,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..40 {
        writer.write_sample(10.0_f32).unwrap();
    }
    writer.finalize().unwrap();

    let tokenizer = SpeechTokenizer::new(small_config(Some(2)), codebook(), stub(4)).unwrap();
    let input = EncodeInput::new().with_item(short_item()).with_file(&path);
    let items = tokenizer
        .encode(input, &EncodeOptions::default())
        .unwrap()
        .into_vec();
    assert_eq!(items[0].code, vec![1; 10]);
    assert_eq!(items[1].code, vec![2; 5]);

    assert_eq!(tokenizer.encode_file(&path).unwrap(), vec![1; 10]);
    std::fs::remove_file(&path).ok();
}

#[test]
fn missing_file_is_an_audio_error() {
    let tokenizer = SpeechTokenizer::new(small_config(Some(2)), codebook(), stub(4)).unwrap();
    let err = tokenizer.encode_file("/nonexistent/clip.wav").unwrap_err();
    assert!(matches!(err, TokenizerError::Audio(_)));
}

struct EchoVocoder;

impl Vocoder for EchoVocoder {
    fn synthesize(&mut self, codes: &[i64], _dur_prediction: bool) -> dtok_core::error::Result<Vec<f32>> {
        Ok(codes.iter().map(|&c| c as f32).collect())
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }
}

#[test]
fn decode_requires_a_vocoder() {
    let tokenizer = SpeechTokenizer::new(small_config(Some(2)), codebook(), stub(4)).unwrap();
    assert!(matches!(
        tokenizer.decode(&[1, 2, 3]),
        Err(TokenizerError::UnsupportedOperation(_))
    ));
    assert_eq!(tokenizer.decode_sample_rate(), None);

    let tokenizer = tokenizer.with_vocoder(CodeToSpeech::new(EchoVocoder).with_code_begin_pad(1));
    assert_eq!(tokenizer.decode(&[1, 2, 3]).unwrap(), vec![2.0, 3.0, 4.0]);
    assert_eq!(tokenizer.decode_sample_rate(), Some(16_000));

    let waves = tokenizer.batch_decode(&[vec![0], vec![4, 5]]).unwrap();
    assert_eq!(waves, vec![vec![1.0], vec![5.0, 6.0]]);
}
