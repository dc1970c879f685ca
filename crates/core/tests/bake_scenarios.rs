mod common;

use common::{ink_bounds, png, two_page_pdf, HALF_LETTER_PX, LETTER};
use pdf_engine::read_page_overlays;
use redline_core::config::BakeSettings;
use redline_core::{
    bake_pdf, Annotation, Color, DocumentId, EngineConfig, LabelFont, MemoryDraftStore,
    OverlayPoint, PagePoint, Painter, Session, StampImage, Tool,
};
use redline_scheduler::CancellationToken;
use std::sync::Arc;
use std::time::Instant;

fn painter() -> Painter {
    Painter::new(LabelFont::bundled().expect("bundled font"))
}

#[test]
fn two_page_bake_marks_each_page_without_bleed() {
    let source = two_page_pdf();
    let stroke = Annotation::stroke(
        1,
        vec![
            PagePoint::new(50.0, 400.0),
            PagePoint::new(100.0, 420.0),
            PagePoint::new(150.0, 400.0),
            PagePoint::new(200.0, 420.0),
            PagePoint::new(250.0, 400.0),
        ],
        Color::RED,
        3.0,
    );
    let label = Annotation::label(1, "OK", PagePoint::new(100.0, 100.0), 24.0, Color::BLUE);
    let stamp = Annotation::stamp(
        2,
        StampImage::new(png(40, 20)),
        PagePoint::new(400.0, 600.0),
        120.0,
        60.0,
    );

    let outcome = bake_pdf(
        &source,
        &[stroke, label, stamp],
        &mut painter(),
        &BakeSettings::default(),
        &CancellationToken::new(),
    )
    .expect("bake");

    assert_eq!(outcome.baked_pages, vec![1, 2]);
    assert!(outcome.is_complete());

    let overlays = read_page_overlays(&outcome.bytes).expect("overlays");
    assert_eq!(overlays.len(), 2);

    let (x0, y0, x1, y1) = ink_bounds(&overlays[0].image).expect("page 1 ink");
    // label glyphs sit above the baseline at y=100, stroke spans y 400..420
    assert!(x0 >= 45 && x1 <= 255, "page 1 ink x range {x0}..{x1}");
    assert!(y0 >= 70 && y0 <= 100, "page 1 ink starts at {y0}");
    assert!(y1 >= 418 && y1 <= 425, "page 1 ink ends at {y1}");

    let (x0, y0, x1, y1) = ink_bounds(&overlays[1].image).expect("page 2 ink");
    assert!((399..=401).contains(&x0) && (599..=601).contains(&y0), "stamp starts at {x0},{y0}");
    assert!((518..=520).contains(&x1) && (658..=660).contains(&y1), "stamp ends at {x1},{y1}");
}

#[test]
fn session_gestures_across_two_pages_bake_without_bleed() {
    let store = Arc::new(MemoryDraftStore::new());
    let mut session =
        Session::open(DocumentId::new("two-pages"), two_page_pdf(), store, EngineConfig::default())
            .expect("open");
    session.on_page_rendered(1, HALF_LETTER_PX).expect("render page 1");
    let now = Instant::now();

    // Five-point stroke: page y 400..420, x 40..200.
    let stroke = [(20.0, 200.0), (40.0, 210.0), (60.0, 200.0), (80.0, 210.0), (100.0, 200.0)];
    session.pointer_down(OverlayPoint::new(stroke[0].0, stroke[0].1), now).expect("down");
    for &(x, y) in &stroke[1..] {
        session.pointer_move(OverlayPoint::new(x, y)).expect("move");
    }
    session.pointer_up(OverlayPoint::new(100.0, 200.0), now).expect("up");

    session.set_tool(Tool::Text).expect("text tool");
    session.pointer_down(OverlayPoint::new(100.0, 100.0), now).expect("down");
    session.confirm_text("OK", now).expect("confirm");

    session.set_page(2).expect("page 2");
    session.on_page_rendered(2, HALF_LETTER_PX).expect("render page 2");
    session.set_tool(Tool::Stamp).expect("stamp tool");
    session.load_stamp_image(png(40, 20)).expect("stamp image");
    session.pointer_down(OverlayPoint::new(100.0, 300.0), now).expect("place");

    let pages: Vec<u32> = session.store().all().iter().map(Annotation::page).collect();
    assert_eq!(pages, vec![1, 1, 2]);

    let outcome = session.bake(&CancellationToken::new()).expect("bake");
    assert_eq!(outcome.baked_pages, vec![1, 2]);
    assert!(outcome.is_complete());

    let overlays = read_page_overlays(&outcome.bytes).expect("overlays");
    assert_eq!(overlays.iter().map(|o| o.page_number).collect::<Vec<_>>(), vec![1, 2]);

    // Page 1: stroke from x 40 and label glyphs above the baseline at y 232.
    let (x0, y0, x1, y1) = ink_bounds(&overlays[0].image).expect("page 1 ink");
    assert!((36..=40).contains(&x0), "page 1 ink starts at x {x0}");
    assert!((200..=228).contains(&y0), "page 1 ink starts at y {y0}");
    assert!((202..=270).contains(&x1), "page 1 ink ends at x {x1}");
    assert!((419..=425).contains(&y1), "page 1 ink ends at y {y1}");

    // Page 2: the stamp alone, 300 x 150 pt from (200, 600).
    let (x0, y0, x1, y1) = ink_bounds(&overlays[1].image).expect("page 2 ink");
    assert!((199..=201).contains(&x0) && (599..=601).contains(&y0), "stamp starts at {x0},{y0}");
    assert!((498..=500).contains(&x1) && (748..=750).contains(&y1), "stamp ends at {x1},{y1}");
}

#[test]
fn bake_leaves_source_bytes_untouched() {
    let source = two_page_pdf();
    let copy = source.clone();
    let label = Annotation::label(2, "Fix", PagePoint::new(10.0, 30.0), 12.0, Color::RED);

    let outcome = bake_pdf(
        &source,
        &[label],
        &mut painter(),
        &BakeSettings::default(),
        &CancellationToken::new(),
    )
    .expect("bake");

    assert_eq!(source, copy);
    assert_ne!(outcome.bytes, source);
    assert_eq!(pdf_engine::page_sizes(&outcome.bytes).expect("sizes"), vec![LETTER, LETTER]);
}

#[test]
fn label_keeps_relative_position_between_overlay_and_bake() {
    let store = Arc::new(MemoryDraftStore::new());
    let mut session =
        Session::open(DocumentId::new("scale"), two_page_pdf(), store, EngineConfig::default())
            .expect("open");
    session.on_page_rendered(1, HALF_LETTER_PX).expect("render");
    session.set_tool(Tool::Text).expect("tool");
    session.pointer_down(OverlayPoint::new(80.0, 120.0), Instant::now()).expect("down");
    session.confirm_text("OK", Instant::now()).expect("confirm");

    let overlay = session.surface(1).expect("surface").to_rgba_image();
    let on_screen = ink_bounds(&overlay).expect("overlay ink");

    let outcome = session.bake(&CancellationToken::new()).expect("bake");
    let baked = read_page_overlays(&outcome.bytes).expect("overlays");
    let in_pdf = ink_bounds(&baked[0].image).expect("baked ink");

    let relative = |value: u32, extent: u32| value as f32 / extent as f32;
    let tolerance = 0.01;
    assert!((relative(on_screen.0, 306) - relative(in_pdf.0, 612)).abs() < tolerance);
    assert!((relative(on_screen.1, 396) - relative(in_pdf.1, 792)).abs() < tolerance);
    assert!((relative(on_screen.2, 306) - relative(in_pdf.2, 612)).abs() < tolerance);
    assert!((relative(on_screen.3, 396) - relative(in_pdf.3, 792)).abs() < tolerance);
}

#[test]
fn replay_is_pixel_identical_across_rerenders() {
    let store = Arc::new(MemoryDraftStore::new());
    let mut session =
        Session::open(DocumentId::new("replay"), two_page_pdf(), store, EngineConfig::default())
            .expect("open");
    session.on_page_rendered(1, HALF_LETTER_PX).expect("render");

    let now = Instant::now();
    session.pointer_down(OverlayPoint::new(10.0, 10.0), now).expect("down");
    session.pointer_move(OverlayPoint::new(60.0, 40.0)).expect("move");
    session.pointer_up(OverlayPoint::new(90.0, 90.0), now).expect("up");
    session.set_tool(Tool::Text).expect("tool");
    session.pointer_down(OverlayPoint::new(100.0, 200.0), now).expect("down");
    session.confirm_text("Check scale", now).expect("confirm");

    session.on_page_rendered(1, HALF_LETTER_PX).expect("render");
    let first = session.surface(1).expect("surface").data().to_vec();
    session.on_page_rendered(1, HALF_LETTER_PX).expect("render");

    assert_eq!(session.surface(1).expect("surface").data(), first.as_slice());
}

#[test]
fn zoom_change_keeps_marks_in_place() {
    let store = Arc::new(MemoryDraftStore::new());
    let mut session =
        Session::open(DocumentId::new("zoom"), two_page_pdf(), store, EngineConfig::default())
            .expect("open");
    session.set_zoom(0.5).expect("zoom");
    let size = session.render_size(1).expect("size");
    assert_eq!(size, HALF_LETTER_PX);
    session.on_page_rendered(1, size).expect("render");

    let now = Instant::now();
    session.pointer_down(OverlayPoint::new(100.0, 100.0), now).expect("down");
    session.pointer_up(OverlayPoint::new(200.0, 100.0), now).expect("up");
    let small = ink_bounds(&session.surface(1).expect("surface").to_rgba_image()).expect("ink");

    session.set_zoom(1.0).expect("zoom");
    let size = session.render_size(1).expect("size");
    session.on_page_rendered(1, size).expect("render");
    let large = ink_bounds(&session.surface(1).expect("surface").to_rgba_image()).expect("ink");

    // twice the pixels, same place on the page
    assert!((large.0 as i64 - 2 * small.0 as i64).abs() <= 2);
    assert!((large.2 as i64 - 2 * small.2 as i64).abs() <= 2);
}
