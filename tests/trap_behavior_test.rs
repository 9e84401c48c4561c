//! Behaviour of the runtime surface, exercised through the same shapes the
//! rewriter emits into trapped functions.

use mockgraft::runtime::{self as rt, Context, StubId};

#[derive(Default)]
struct M {
    run: Option<fn(&Context, i32) -> Result<i32, String>>,
}

static STUB: StubId = StubId {
    pkg: "demo::service",
    owner: "",
    owner_ptr: false,
    name: "run",
};

// The rewritten shape: prelude dispatching to the inner function.
fn run(ctx: &Context, status: i32) -> Result<i32, String> {
    static REQ_FIELDS: &[&str] = &["Status"];
    static RESP_FIELDS: &[&str] = &["M_Resp_0"];
    let f = rt::table::<M>(Some(ctx), STUB.pkg).and_then(|t| t.run);
    rt::trap_fn(
        Some(ctx),
        &STUB,
        REQ_FIELDS,
        RESP_FIELDS,
        (status,),
        f.is_some(),
        move |req, use_mock| {
            if use_mock {
                (f.unwrap())(ctx, req.0)
            } else {
                run_inner(ctx, req.0)
            }
        },
        false,
        true,
        true,
    )
}

fn run_inner(_ctx: &Context, status: i32) -> Result<i32, String> {
    if status < 0 {
        return Err("negative".to_string());
    }
    Ok(status * 2)
}

#[test]
fn unmocked_call_matches_original() {
    let ctx = Context::new();
    assert_eq!(run(&ctx, 21), run_inner(&ctx, 21));
    assert_eq!(run(&ctx, -1), Err("negative".to_string()));
}

#[test]
fn attached_mock_takes_over() {
    let base = Context::new();
    let ctx = rt::with_mock_table(
        &base,
        STUB.pkg,
        M {
            run: Some(|_, status| Ok(status + 1)),
        },
    );
    assert_eq!(run(&ctx, 41), Ok(42));
    // The base context stays unmocked.
    assert_eq!(run(&base, 41), Ok(82));
}

#[test]
fn empty_table_falls_back_to_original() {
    let ctx = rt::with_mock_table(&Context::new(), STUB.pkg, M::default());
    assert_eq!(run(&ctx, 10), Ok(20));
}

#[test]
fn interceptor_can_force_the_original() {
    // Interceptors are process-wide; key on a dedicated package so other
    // tests stay unaffected.
    #[derive(Default)]
    struct F {
        run: Option<fn(&Context) -> i32>,
    }
    static FORCED: StubId = StubId {
        pkg: "demo::forced",
        owner: "",
        owner_ptr: false,
        name: "run",
    };
    fn forced(ctx: &Context) -> i32 {
        let f = rt::table::<F>(Some(ctx), FORCED.pkg).and_then(|t| t.run);
        rt::trap_fn(
            Some(ctx),
            &FORCED,
            &[],
            &["M_Resp_0"],
            (),
            f.is_some(),
            move |_, use_mock| {
                if use_mock {
                    (f.unwrap())(ctx)
                } else {
                    7
                }
            },
            false,
            true,
            false,
        )
    }

    rt::add_interceptor(|_, info, decision| {
        if info.stub.pkg == "demo::forced" {
            decision.use_mock = false;
        }
    });
    let ctx = rt::with_mock_table(&Context::new(), FORCED.pkg, F { run: Some(|_| 99) });
    assert_eq!(forced(&ctx), 7);
}
