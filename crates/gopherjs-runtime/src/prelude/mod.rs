//! JavaScript prelude emitted at the top of every linked program.
//!
//! It defines `$global` and the `$packages` registry. Each package unit
//! calls `$packages.$register(path, imports, construct)`; `construct` is an
//! async function receiving `$import`, which resolves a dependency and, when
//! it is not registered yet, fetches `<base>/<path>.js` first. Start-up
//! order lives in `$packages.$start`.

pub fn prelude() -> &'static str {
    PRELUDE
}

const PRELUDE: &str = r#"var $global, $module;
if (typeof window !== "undefined") {
	$global = window;
} else if (typeof self !== "undefined") {
	$global = self;
} else if (typeof global !== "undefined") {
	$global = global;
	$global.require = require;
} else {
	$global = this;
}
if ($global === undefined || $global.Array === undefined) {
	throw new Error("no global object found");
}
if (typeof module !== "undefined") {
	$module = module;
}

var $output = "";
var $print = function(s) {
	$output += s;
};
var $flushConsole = function() {
	if ($output.length !== 0) {
		console.log($output);
		$output = "";
	}
};

var $packages = (function() {
	var units = {};
	var loaded = [];
	var linkHooks = [];
	var base = ($global.$goPackageBase !== undefined) ? $global.$goPackageBase : ".";

	var unit = function(path) {
		var u = units[path];
		if (u === undefined) {
			u = units[path] = { registered: false, fetching: false };
			u.promise = new Promise(function(resolve, reject) {
				u.resolve = resolve;
				u.reject = reject;
			});
		}
		return u;
	};

	var evaluate = function(src) {
		(0, eval)(src);
	};

	var fetchUnit = function(path) {
		var location = base + "/" + path + ".js";
		if (typeof $global.fetch === "function") {
			return $global.fetch(location).then(function(response) {
				if (!response.ok) {
					throw new Error("failed to fetch " + location + ": " + response.status);
				}
				return response.text();
			}).then(evaluate);
		}
		return new Promise(function(resolve) {
			evaluate(require("fs").readFileSync(location, "utf8"));
			resolve();
		});
	};

	var load = function(path) {
		var u = unit(path);
		if (!u.registered && !u.fetching) {
			u.fetching = true;
			fetchUnit(path).then(function() {
				if (!u.registered) {
					throw new Error("package " + path + " was fetched but did not register");
				}
			}).catch(u.reject);
		}
		return u.promise;
	};

	var register = function(path, imports, construct) {
		var u = unit(path);
		if (u.registered) {
			return;
		}
		u.registered = true;
		Promise.resolve().then(function() {
			return construct(load);
		}).then(function(pkg) {
			pkg.$path = path;
			pkg.$imports = imports;
			loaded.push(pkg);
			u.resolve(pkg);
		}, u.reject);
	};

	var link = function(hook) {
		linkHooks.push(hook);
	};

	var start = function(path) {
		return Promise.all([load(path), load("runtime")]).then(function(resolved) {
			var main = resolved[0], runtime = resolved[1];
			var i;
			for (i = 0; i < loaded.length; i++) {
				if (loaded[i].$finishSetup !== undefined) {
					loaded[i].$finishSetup();
				}
			}
			for (i = 0; i < linkHooks.length; i++) {
				linkHooks[i]();
			}
			runtime.$init();
			main.$init();
			if (main.main !== undefined) {
				main.main();
			}
			$flushConsole();
		}).catch(function(err) {
			$flushConsole();
			console.error(err);
			throw err;
		});
	};

	return { $register: register, $load: load, $link: link, $start: start };
})();

"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_exposes_registry() {
        let js = prelude();
        for name in ["$register: register", "$load: load", "$link: link", "$start: start"] {
            assert!(js.contains(name), "missing {name}");
        }
        assert!(js.contains("base + \"/\" + path + \".js\""));
    }

    #[test]
    fn test_start_up_order() {
        let js = prelude();
        let steps = [
            "$finishSetup()",
            "linkHooks[i]()",
            "runtime.$init()",
            "main.$init()",
            "main.main()",
            "$flushConsole();\n\t\t}).catch",
        ];
        let positions: Vec<usize> = steps.iter().map(|s| js.find(s).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }
}
