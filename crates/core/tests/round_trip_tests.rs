mod common;

use std::io::Cursor;
use std::rc::Rc;

use common::sample_program;
use script_persist::{
    read_object_file, write_object_file, Bytecode, GraphStats, PersistConfig, Shared, Value,
};

fn save(entry: &Shared<Bytecode>) -> Vec<u8> {
    write_object_file(Cursor::new(Vec::new()), entry, &[], &PersistConfig::default())
        .expect("object file should write")
        .into_inner()
}

#[test]
fn object_graph_round_trips_with_identity() {
    let original = sample_program();
    let file = read_object_file(Cursor::new(save(&original)), &PersistConfig::default())
        .expect("object file should read");

    assert_eq!(
        file.graph.stats(),
        GraphStats {
            procedures: 2,
            arrays: 1,
            hashes: 1,
            records: 1,
            record_types: 1,
        }
    );

    let main = file.entry().expect("entry procedure");
    let main = main.borrow();
    let source = original.borrow();
    assert_eq!(main.name, source.name);
    assert_eq!(main.debug_file, source.debug_file);
    assert_eq!(main.names, source.names);
    assert_eq!(main.code, source.code);
    assert_eq!(main.lines, source.lines);
    assert_eq!(main.label_count, 1);
    assert_eq!(main.literals.len(), source.literals.len());
    assert_eq!(main.literals[4..], source.literals[4..]);

    let (Value::Hash(settings), Value::Array(grid), Value::Procedure(helper), Value::RecordType(point)) = (
        &main.literals[0],
        &main.literals[1],
        &main.literals[2],
        &main.literals[3],
    ) else {
        panic!("unexpected literal kinds: {:?}", &main.literals[..4]);
    };

    // The hash entry and the literal are one array object.
    let settings = settings.borrow();
    let Some(Value::Array(nested)) = settings.get("grid") else {
        panic!("grid entry should be an array");
    };
    assert!(Rc::ptr_eq(nested, grid));
    assert_eq!(settings.get("ratio"), Some(&Value::Float(0.75)));
    assert_eq!(settings.get("blob"), Some(&Value::Blob(vec![1, 2, 3, 4])));

    let grid = grid.borrow();
    assert_eq!(grid.dims(), &[2, 3]);
    assert_eq!(grid.get(4), Some(&Value::Int(4)));
    let Some(Value::Record(origin)) = grid.get(5) else {
        panic!("slot 5 should be a record");
    };
    let origin = origin.borrow();
    assert!(Rc::ptr_eq(&origin.ty, point));
    assert_eq!(origin.field("y"), Some(&Value::Float(-2.5)));

    let helper = helper.borrow();
    assert!(helper.is_function());
    assert_eq!(helper.name.as_deref(), Some("helper"));
    assert_eq!(helper.literals.len(), 1);
}

#[test]
fn saving_is_deterministic() {
    let program = sample_program();
    assert_eq!(save(&program), save(&program));
}

#[test]
fn reloaded_graph_saves_to_the_same_bytes() {
    let bytes = save(&sample_program());
    let file = read_object_file(Cursor::new(bytes.clone()), &PersistConfig::default())
        .expect("object file should read");
    let entry = file.entry().expect("entry procedure");
    assert_eq!(save(&entry), bytes);
}
