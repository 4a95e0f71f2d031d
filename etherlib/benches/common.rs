use etherlib::config::CompilerOptions;
use etherlib::{Compiled, compile_source, parse_source};

pub fn src_loop_accumulate(iters: usize) -> String {
    format!(
        r#"
def accumulate(): Int {{
  var i = 0
  var acc = 0
  while (i < {iters}) {{
    acc = acc + i * (3 - 2)
    i += 1
  }}
  return acc
}}
"#
    )
}

pub fn src_switch_dispatch(arms: usize) -> String {
    let mut cases = String::new();
    for k in 0..arms {
        cases.push_str(&format!("    {k}: return {}\n", k * 7 % 13));
    }
    format!(
        r#"
def score(x: Int): Int {{
  switch (x) {{
{cases}    else: return -1
  }}
}}
def names(s: String): Int {{
  switch (s) {{
    "alpha": return 1
    "beta": return 2
    "gamma", "delta": return 3
    else: return 0
  }}
}}
"#
    )
}

pub fn src_struct_methods(types: usize) -> String {
    let mut out = String::new();
    for t in 0..types {
        out.push_str(&format!(
            r#"
type Node{t} {{ value: Int, next: Node{t} }}
def Node{t}.sum(): Int {{
  var total = 0
  var cur = this
  while (cur != null) {{
    total += cur.value
    cur = cur.next
  }}
  return total
}}
def Node{t}.add(o: Node{t}): Node{t} = new Node{t} {{ value = value + o.value }}
def build{t}(n: Int): Node{t} {{
  var head: Node{t} = null
  for (var i in 1..n) head = new Node{t} {{ value = i, next = head }}
  return head
}}
"#
        ));
    }
    out
}

pub fn medium_source() -> String {
    format!(
        "{}\n{}\n{}\ndef main(): Int = accumulate() + score(3) + names(\"beta\") + build0(10).sum()\n",
        src_loop_accumulate(2_000),
        src_switch_dispatch(64),
        src_struct_methods(40)
    )
}

pub fn parse_only(src: &str) -> usize {
    let (unit, _) = parse_source(src, &CompilerOptions::default()).expect("source should parse");
    unit.implemented.len()
}

pub fn compile_at(src: &str, opt_level: u8) -> Compiled {
    let options = CompilerOptions {
        opt_level,
        ..CompilerOptions::default()
    };
    compile_source(src, &options).expect("source should compile")
}
